use super::{agent_backend, context, context_with, test_runtime};
use futures::FutureExt;
use mal0_core::transport::{BackendFailure, CHAT_PATH, HISTORY_PATH};
use mal0_core::{
    generate_session_id, ClientContext, ClientError, FailedSendPolicy, MemoryStorage,
    MessageRole, SessionState,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn logged_in(context: &ClientContext, runtime: &tokio::runtime::Runtime) {
    runtime
        .block_on(context.session().login("agent1", "correct"))
        .expect("login");
}

#[test]
fn hello_round_trip() {
    let runtime = test_runtime();
    let backend = agent_backend();
    backend.script_reply("hi there", "calm");
    let context = context(backend);
    logged_in(&context, &runtime);

    let reply = runtime.block_on(context.chat().send("hello")).expect("send");
    assert_eq!(reply.content, "hi there");

    let snapshot = context.messages().snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].role, MessageRole::User);
    assert_eq!(snapshot.messages[0].content, "hello");
    assert_eq!(snapshot.messages[1].role, MessageRole::Assistant);
    assert_eq!(snapshot.messages[1].content, "hi there");
    assert_eq!(snapshot.messages[1].emotion.as_deref(), Some("calm"));
    assert_eq!(snapshot.current_emotion, "calm");
    assert!(!snapshot.is_typing);
}

#[test]
fn reply_emotion_becomes_current() {
    let runtime = test_runtime();
    let context = context(agent_backend());
    logged_in(&context, &runtime);
    assert_eq!(context.messages().current_emotion(), "calm");

    runtime
        .block_on(context.chat().send("thanks, that was great"))
        .expect("send");
    assert_eq!(context.messages().current_emotion(), "joy");
}

#[test]
fn send_carries_token_and_conversation() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    let session_id = context.chat().session_id().expect("conversation");

    runtime.block_on(context.chat().send("  padded  ")).expect("send");
    let requests = backend.requests();
    let chat = requests.last().expect("chat request");
    assert_eq!(chat.path, CHAT_PATH);
    assert!(chat.bearer.as_deref().is_some_and(|t| t.starts_with("fake-token-")));
    let body = chat.body.as_ref().expect("body");
    assert_eq!(body["message"], "padded");
    assert_eq!(body["session_id"], session_id.as_str());

    let first = &context.messages().messages()[0];
    assert_eq!(first.session_id, session_id);
    assert_eq!(first.user_id, context.session().current_user().map(|p| p.id));
}

#[test]
fn blank_messages_are_rejected_before_anything_happens() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    let calls = backend.request_count();
    let revision = context.messages().revision();

    for text in ["", "   ", "\n\t"] {
        let outcome = context
            .chat()
            .send(text)
            .now_or_never()
            .expect("rejected without suspending");
        assert!(matches!(outcome, Err(ClientError::Validation(_))));
    }
    assert!(context.messages().is_empty());
    assert_eq!(context.messages().revision(), revision);
    assert_eq!(backend.request_count(), calls);
}

#[test]
fn send_requires_login_and_conversation() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());

    let outcome = context.chat().send("hello").now_or_never().expect("immediate");
    assert_eq!(outcome.unwrap_err(), ClientError::NotAuthenticated);

    logged_in(&context, &runtime);
    context.chat().close();
    let calls = backend.request_count();
    let outcome = context.chat().send("hello").now_or_never().expect("immediate");
    assert_eq!(outcome.unwrap_err(), ClientError::NoConversation);
    assert_eq!(backend.request_count(), calls);
}

#[test]
fn second_send_is_rejected_while_first_is_in_flight() {
    let runtime = test_runtime();
    let backend = agent_backend();
    backend.script_reply("one at a time", "playful");
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    let gate = backend.hold_chat();

    runtime.block_on(async {
        let chat = context.chat().clone();
        let first = tokio::spawn(async move { chat.send("first").await });
        gate.entered().await;

        assert!(context.chat().is_sending());
        assert!(context.messages().is_typing());
        let second = context
            .chat()
            .send("second")
            .now_or_never()
            .expect("rejected without suspending");
        assert_eq!(second.unwrap_err(), ClientError::SendInProgress);
        assert_eq!(context.messages().len(), 1);

        gate.release();
        let reply = first.await.expect("join").expect("reply");
        assert_eq!(reply.content, "one at a time");
    });

    let contents: Vec<String> = context
        .messages()
        .messages()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, ["first", "one at a time"]);
    assert!(!context.messages().is_typing());
    assert!(!context.chat().is_sending());
    let chats = backend.requests().iter().filter(|r| r.path == CHAT_PATH).count();
    assert_eq!(chats, 1);
}

#[test]
fn reply_for_a_replaced_conversation_is_dropped() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    let gate = backend.hold_chat();

    runtime.block_on(async {
        let chat = context.chat().clone();
        let pending = tokio::spawn(async move { chat.send("stale").await });
        gate.entered().await;
        context.chat().open().expect("new conversation");
        gate.release();
        pending.await.expect("join").expect("reply still returned");
    });

    assert!(context.messages().is_empty());
    assert!(!context.messages().is_typing());
}

#[test]
fn failed_send_keeps_the_optimistic_message() {
    let runtime = test_runtime();
    let backend = agent_backend();
    backend.fail_next(CHAT_PATH, 500);
    let context = context(backend);
    logged_in(&context, &runtime);

    let err = runtime.block_on(context.chat().send("hello")).unwrap_err();
    assert!(matches!(err, ClientError::ServerError { status: 500, .. }));
    let messages = context.messages().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello");
    assert!(!messages[0].is_failed());
    assert!(!context.messages().is_typing());
}

#[test]
fn failed_send_can_be_flagged() {
    let runtime = test_runtime();
    let backend = agent_backend();
    backend.fail_next(CHAT_PATH, 503);
    let context = context_with(
        backend,
        Arc::new(MemoryStorage::default()),
        FailedSendPolicy::MarkFailed,
    );
    logged_in(&context, &runtime);

    assert!(runtime.block_on(context.chat().send("hello")).is_err());
    let messages = context.messages().messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_failed());

    runtime.block_on(context.chat().send("again")).expect("send");
    let messages = context.messages().messages();
    assert_eq!(messages.len(), 3);
    assert!(!messages[1].is_failed());
}

#[test]
fn offline_send_reports_network_failure() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    backend.set_offline(true);

    let err = runtime.block_on(context.chat().send("anyone?")).unwrap_err();
    assert!(matches!(err, ClientError::NetworkUnavailable(_)));
    assert!(context.state().is_authenticated());
    assert!(context.credentials().has_credential());
}

#[test]
fn backend_timeout_is_reported_as_timeout() {
    let runtime = test_runtime();
    let backend = agent_backend();
    backend.force_next(CHAT_PATH, Err(BackendFailure::Timeout));
    let context = context(backend);
    logged_in(&context, &runtime);

    let err = runtime.block_on(context.chat().send("hello")).unwrap_err();
    assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_secs(30)));
    assert!(!context.messages().is_typing());
}

#[test]
fn unauthorized_send_expires_the_session() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    backend.revoke_all_tokens();

    let err = runtime.block_on(context.chat().send("hello")).unwrap_err();
    assert_eq!(err, ClientError::AuthExpired);
    assert_eq!(context.state(), SessionState::Expired);
    assert!(context.credentials().load().expect("load").is_none());
}

#[test]
fn unauthorized_history_expires_but_stays_best_effort() {
    let runtime = test_runtime();
    let backend = agent_backend();
    backend.fail_next(HISTORY_PATH, 401);
    let context = context(backend);
    logged_in(&context, &runtime);

    let history = runtime
        .block_on(context.chat().fetch_history())
        .expect("best effort");
    assert!(history.is_empty());
    assert_eq!(context.state(), SessionState::Expired);
    assert!(!context.credentials().has_credential());
}

#[test]
fn history_server_error_yields_empty_list() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    runtime.block_on(context.chat().send("hello")).expect("send");
    backend.fail_next(HISTORY_PATH, 500);

    let history = runtime
        .block_on(context.chat().fetch_history())
        .expect("best effort");
    assert!(history.is_empty());
    assert!(context.state().is_authenticated());
    assert_eq!(context.messages().len(), 2);
}

#[test]
fn history_returns_server_records_in_order() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);
    runtime.block_on(context.chat().send("hello")).expect("send");
    runtime.block_on(context.chat().send("so tired")).expect("send");

    let history = runtime
        .block_on(context.chat().fetch_history())
        .expect("history");
    let roles: Vec<MessageRole> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant
        ]
    );
    assert_eq!(history[3].emotion.as_deref(), Some("tired"));
    let session_id = context.chat().session_id().expect("conversation");
    assert!(history.iter().all(|m| m.session_id == session_id));
    assert_eq!(backend.history_for(&session_id).len(), 4);
}

#[test]
fn sync_replaces_log_only_when_it_does_not_shrink() {
    let runtime = test_runtime();
    let backend = agent_backend();
    let context = context(backend.clone());
    logged_in(&context, &runtime);

    runtime.block_on(context.chat().send("hello")).expect("send");
    let local_ids: HashSet<String> = context.messages().messages().into_iter().map(|m| m.id).collect();
    assert!(runtime.block_on(context.chat().sync_history()).expect("sync"));
    let synced = context.messages().messages();
    assert_eq!(synced.len(), 2);
    assert!(synced.iter().all(|m| !local_ids.contains(&m.id)));

    backend.fail_next(CHAT_PATH, 500);
    let _ = runtime.block_on(context.chat().send("lost"));
    assert_eq!(context.messages().len(), 3);
    assert!(!runtime.block_on(context.chat().sync_history()).expect("sync"));
    assert_eq!(context.messages().len(), 3);
}

#[test]
fn new_conversation_starts_empty() {
    let runtime = test_runtime();
    let context = context(agent_backend());
    logged_in(&context, &runtime);
    let first = context.chat().session_id().expect("conversation");
    runtime.block_on(context.chat().send("hello")).expect("send");

    let second = context.chat().open().expect("open");
    assert_ne!(first, second);
    assert!(context.messages().is_empty());
    let history = runtime
        .block_on(context.chat().fetch_history())
        .expect("history");
    assert!(history.is_empty());
}

#[test]
fn store_changes_are_observable() {
    let runtime = test_runtime();
    let context = context(agent_backend());
    logged_in(&context, &runtime);
    let mut rx = context.messages().subscribe();
    let before = *rx.borrow_and_update();

    runtime.block_on(context.chat().send("hello")).expect("send");
    assert!(rx.has_changed().expect("sender alive"));
    // two appends, the emotion, typing on and off
    assert_eq!(*rx.borrow_and_update(), before + 5);
}

#[test]
fn session_ids_are_unique() {
    let ids: HashSet<String> = (0..10_000).map(|_| generate_session_id()).collect();
    assert_eq!(ids.len(), 10_000);
    assert!(ids.iter().all(|id| id.starts_with("session-")));
}

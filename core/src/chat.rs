use crate::error::ClientError;
use crate::messages::MessageStore;
use crate::model::{ChatReply, ChatRequest, Message};
use crate::session::SessionSignal;
use crate::transport::{AuthenticatedTransport, CHAT_PATH, HISTORY_PATH};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What happens to the optimistic user message when its send fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedSendPolicy {
    #[default]
    Keep,
    MarkFailed,
}

static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

/// `session-<millis>-<suffix>`, where millis never goes backwards within the
/// process and the suffix carries 64 random bits in base 36.
pub fn generate_session_id() -> String {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_MILLIS.fetch_max(now, Ordering::Relaxed);
    let millis = previous.max(now);
    let random = Uuid::new_v4().as_u64_pair().0;
    format!("session-{millis}-{}", to_base36(random))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[derive(Debug, Default)]
struct Conversation {
    session_id: Option<String>,
}

#[derive(Clone)]
pub struct ChatSession {
    transport: AuthenticatedTransport,
    session: SessionSignal,
    messages: MessageStore,
    conversation: Arc<RwLock<Conversation>>,
    in_flight: Arc<AtomicBool>,
    policy: FailedSendPolicy,
}

struct InFlight<'a> {
    flag: &'a AtomicBool,
    messages: &'a MessageStore,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, messages: &'a MessageStore) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, messages })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.messages.set_typing(false);
        self.flag.store(false, Ordering::Release);
    }
}

impl ChatSession {
    pub fn new(
        transport: AuthenticatedTransport,
        session: SessionSignal,
        messages: MessageStore,
        policy: FailedSendPolicy,
    ) -> Self {
        Self {
            transport,
            session,
            messages,
            conversation: Arc::new(RwLock::new(Conversation::default())),
            in_flight: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn session_id(&self) -> Option<String> {
        self.conversation.read().session_id.clone()
    }

    pub fn is_open(&self) -> bool {
        self.conversation.read().session_id.is_some()
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn open(&self) -> Result<String, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let session_id = generate_session_id();
        self.conversation.write().session_id = Some(session_id.clone());
        self.messages.clear();
        debug!("session_id" = %session_id, "opened conversation");
        Ok(session_id)
    }

    pub fn close(&self) {
        self.conversation.write().session_id = None;
        self.messages.clear();
    }

    pub async fn send(&self, text: &str) -> Result<Message, ClientError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("message is empty".to_string()));
        }
        let user_id = match self.session.current().profile() {
            Some(profile) => profile.id.clone(),
            None => return Err(ClientError::NotAuthenticated),
        };
        let session_id = self.session_id().ok_or(ClientError::NoConversation)?;
        let _in_flight =
            InFlight::acquire(&self.in_flight, &self.messages).ok_or(ClientError::SendInProgress)?;

        let optimistic = Message::user(session_id.clone(), Some(user_id), content);
        let optimistic_id = optimistic.id.clone();
        self.messages.append(optimistic);
        self.messages.set_typing(true);

        let request = ChatRequest {
            message: content,
            session_id: &session_id,
        };
        let outcome = self
            .transport
            .post::<_, ChatReply>(CHAT_PATH, &request)
            .await;

        match outcome {
            Ok(reply) => {
                let reply_message = Message::assistant(session_id.clone(), reply.response, reply.emotion);
                if self.session_id().as_deref() != Some(session_id.as_str()) {
                    debug!("session_id" = %session_id, "dropping reply for a closed conversation");
                    return Ok(reply_message);
                }
                if let Some(emotion) = &reply_message.emotion {
                    self.messages.set_emotion(emotion.clone());
                }
                self.messages.append(reply_message.clone());
                Ok(reply_message)
            }
            Err(err) => {
                warn!(%err, "chat send failed");
                if self.policy == FailedSendPolicy::MarkFailed {
                    self.messages.mark_failed(&optimistic_id);
                }
                Err(err)
            }
        }
    }

    /// Best-effort: transport and server failures yield an empty list. Only a
    /// missing session or conversation is reported, before any network call.
    pub async fn fetch_history(&self) -> Result<Vec<Message>, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let session_id = self.session_id().ok_or(ClientError::NoConversation)?;
        let path = format!("{HISTORY_PATH}/{session_id}");
        match self.transport.get::<Vec<Message>>(&path).await {
            Ok(history) => Ok(history),
            Err(err) => {
                warn!(%err, "session_id" = %session_id, "history unavailable");
                Ok(Vec::new())
            }
        }
    }

    pub async fn sync_history(&self) -> Result<bool, ClientError> {
        let session_id = self.session_id();
        let history = self.fetch_history().await?;
        if history.is_empty() || self.session_id() != session_id || self.is_sending() {
            return Ok(false);
        }
        Ok(self.messages.replace_all_if_not_shorter(history))
    }
}

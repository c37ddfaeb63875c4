use crate::transport::{
    ApiRequest, ApiResponse, BackendFailure, HttpBackend, Method, CHAT_PATH, HISTORY_PATH,
    LOGIN_PATH, ME_PATH,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

struct FakeUser {
    password: String,
    profile: Value,
}

#[derive(Default)]
struct FakeState {
    users: HashMap<String, FakeUser>,
    tokens: HashMap<String, String>,
    history: HashMap<String, Vec<Value>>,
    scripted_replies: VecDeque<(String, String)>,
    forced: HashMap<String, VecDeque<Result<ApiResponse, BackendFailure>>>,
    offline: bool,
    log: Vec<RecordedRequest>,
}

#[derive(Clone)]
pub struct ReplyGate {
    permits: Arc<Semaphore>,
    entered: Arc<Semaphore>,
}

impl ReplyGate {
    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    pub async fn entered(&self) {
        if let Ok(permit) = self.entered.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    gate: Mutex<Option<(String, ReplyGate)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(username: &str, password: &str) -> Self {
        let backend = Self::new();
        backend.add_user(username, password, 1);
        backend
    }

    pub fn add_user(&self, username: &str, password: &str, clearance_level: i32) {
        let profile = json!({
            "id": Uuid::new_v4().to_string(),
            "username": username,
            "clearance_level": clearance_level,
            "created_at": Utc::now().to_rfc3339(),
            "is_active": true,
        });
        self.state.lock().users.insert(
            username.to_owned(),
            FakeUser {
                password: password.to_owned(),
                profile,
            },
        );
    }

    pub fn deactivate_user(&self, username: &str) {
        if let Some(user) = self.state.lock().users.get_mut(username) {
            user.profile["is_active"] = json!(false);
        }
    }

    pub fn set_clearance(&self, username: &str, clearance_level: i32) {
        if let Some(user) = self.state.lock().users.get_mut(username) {
            user.profile["clearance_level"] = json!(clearance_level);
        }
    }

    pub fn revoke_all_tokens(&self) {
        self.state.lock().tokens.clear();
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn script_reply(&self, response: &str, emotion: &str) {
        self.state
            .lock()
            .scripted_replies
            .push_back((response.to_owned(), emotion.to_owned()));
    }

    /// Answer the next request whose path starts with `path_prefix` with `status`.
    pub fn fail_next(&self, path_prefix: &str, status: u16) {
        self.force_next(
            path_prefix,
            Ok(ApiResponse::json(status, &json!({ "detail": "forced failure" }))),
        );
    }

    pub fn force_next(&self, path_prefix: &str, outcome: Result<ApiResponse, BackendFailure>) {
        self.state
            .lock()
            .forced
            .entry(path_prefix.to_owned())
            .or_default()
            .push_back(outcome);
    }

    pub fn hold_chat(&self) -> ReplyGate {
        self.hold(CHAT_PATH)
    }

    pub fn hold(&self, path_prefix: &str) -> ReplyGate {
        let gate = ReplyGate {
            permits: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Semaphore::new(0)),
        };
        *self.gate.lock() = Some((path_prefix.to_owned(), gate.clone()));
        gate
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn history_for(&self, session_id: &str) -> Vec<Value> {
        self.state
            .lock()
            .history
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    fn take_forced(state: &mut FakeState, path: &str) -> Option<Result<ApiResponse, BackendFailure>> {
        let key = state
            .forced
            .iter()
            .find(|(prefix, queue)| path.starts_with(prefix.as_str()) && !queue.is_empty())
            .map(|(prefix, _)| prefix.clone())?;
        state.forced.get_mut(&key).and_then(VecDeque::pop_front)
    }

    fn handle(state: &mut FakeState, request: &ApiRequest) -> ApiResponse {
        let caller = request
            .bearer()
            .and_then(|token| state.tokens.get(token).cloned());
        match (request.method, request.path.as_str()) {
            (Method::Post, LOGIN_PATH) => Self::login(state, request.body.as_ref()),
            (Method::Get, ME_PATH) => match caller.and_then(|name| state.users.get(&name)) {
                Some(user) => ApiResponse::json(200, &user.profile),
                None => unauthorized(),
            },
            (Method::Post, CHAT_PATH) => match caller {
                Some(username) => Self::chat(state, &username, request.body.as_ref()),
                None => unauthorized(),
            },
            (Method::Get, path) if path.starts_with(HISTORY_PATH) => {
                if caller.is_none() {
                    return unauthorized();
                }
                let session_id = path
                    .trim_start_matches(HISTORY_PATH)
                    .trim_start_matches('/');
                let history = state.history.get(session_id).cloned().unwrap_or_default();
                ApiResponse::json(200, &Value::Array(history))
            }
            _ => ApiResponse::json(404, &json!({ "detail": "Not Found" })),
        }
    }

    fn login(state: &mut FakeState, body: Option<&Value>) -> ApiResponse {
        let field = |name: &str| {
            body.and_then(|body| body.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let (username, password) = (field("username"), field("password"));
        let Some(user) = state.users.get(&username) else {
            return ApiResponse::json(401, &json!({ "detail": "Invalid credentials" }));
        };
        if user.password != password {
            return ApiResponse::json(401, &json!({ "detail": "Invalid credentials" }));
        }
        if user.profile["is_active"] == json!(false) {
            return ApiResponse::json(403, &json!({ "detail": "User account is disabled" }));
        }
        let profile = user.profile.clone();
        let token = format!("fake-token-{}", Uuid::new_v4());
        state.tokens.insert(token.clone(), username);
        ApiResponse::json(
            200,
            &json!({ "access_token": token, "token_type": "bearer", "user": profile }),
        )
    }

    fn chat(state: &mut FakeState, username: &str, body: Option<&Value>) -> ApiResponse {
        let text = |name: &str| {
            body.and_then(|body| body.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let (message, session_id) = (text("message"), text("session_id"));
        let user_id = state
            .users
            .get(username)
            .map(|user| user.profile["id"].clone())
            .unwrap_or(Value::Null);
        let (response, emotion) = state
            .scripted_replies
            .pop_front()
            .unwrap_or_else(|| (format!("[MAL0] received '{message}'."), detect_emotion(&message)));

        let log = state.history.entry(session_id.clone()).or_default();
        log.push(json!({
            "id": Uuid::new_v4().to_string(),
            "session_id": session_id,
            "user_id": user_id,
            "role": "user",
            "content": message,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        log.push(json!({
            "id": Uuid::new_v4().to_string(),
            "session_id": session_id,
            "user_id": user_id,
            "role": "assistant",
            "content": response,
            "emotion": emotion,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        ApiResponse::json(200, &json!({ "response": response, "emotion": emotion }))
    }
}

fn unauthorized() -> ApiResponse {
    ApiResponse::json(401, &json!({ "detail": "Not authenticated" }))
}

/// Keyword tally; ties resolve joy, sad, playful, tired in that order.
fn detect_emotion(text: &str) -> String {
    const KEYWORDS: [(&str, &[&str]); 4] = [
        ("joy", &["thank", "great", "love", "happy", "awesome"]),
        ("sad", &["sad", "sorry", "bad", "awful", "unfortunately"]),
        ("playful", &["play", "game", "fun", "joke", "curious"]),
        ("tired", &["tired", "sleep", "exhausted", "weary"]),
    ];
    let lower = text.to_lowercase();
    let mut best = ("calm", 0);
    for (emotion, words) in KEYWORDS {
        let hits = words.iter().filter(|word| lower.contains(*word)).count();
        if hits > best.1 {
            best = (emotion, hits);
        }
    }
    best.0.to_string()
}

#[async_trait]
impl HttpBackend for FakeBackend {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, BackendFailure> {
        let forced = {
            let mut state = self.state.lock();
            state.log.push(RecordedRequest {
                method: request.method,
                path: request.path.clone(),
                bearer: request.bearer().map(str::to_owned),
                body: request.body.clone(),
            });
            if state.offline {
                return Err(BackendFailure::Network("fake backend is offline".to_string()));
            }
            Self::take_forced(&mut state, &request.path)
        };

        let gate = self
            .gate
            .lock()
            .as_ref()
            .filter(|(prefix, _)| request.path.starts_with(prefix.as_str()))
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.entered.add_permits(1);
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }

        if let Some(outcome) = forced {
            return outcome;
        }
        Ok(Self::handle(&mut self.state.lock(), &request))
    }
}

use crate::credentials::CredentialStore;
use crate::error::ClientError;
use crate::session::SessionSignal;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const ME_PATH: &str = "/api/auth/me";
pub const CHAT_PATH: &str = "/api/chat";
pub const HISTORY_PATH: &str = "/api/chat/history";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    bearer: Option<SecretString>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_ref().map(|token| token.expose_secret())
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("authenticated", &self.bearer.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    Timeout,
    Network(String),
}

#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, BackendFailure>;
}

pub struct ReqwestBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestBackend {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, ClientError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| ClientError::NetworkUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, BackendFailure> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(token) = request.bearer() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;
        Ok(ApiResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> BackendFailure {
    if err.is_timeout() {
        BackendFailure::Timeout
    } else {
        BackendFailure::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthMode {
    Bearer,
    Anonymous,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Value,
}

#[derive(Clone)]
pub struct AuthenticatedTransport {
    backend: Arc<dyn HttpBackend>,
    credentials: CredentialStore,
    session: SessionSignal,
    timeout: Duration,
}

impl AuthenticatedTransport {
    pub fn new(
        backend: Arc<dyn HttpBackend>,
        credentials: CredentialStore,
        session: SessionSignal,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            credentials,
            session,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.dispatch(Method::Get, path, None, AuthMode::Bearer).await?;
        decode(&response)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        let response = self
            .dispatch(Method::Post, path, Some(body), AuthMode::Bearer)
            .await?;
        decode(&response)
    }

    pub(crate) async fn post_anonymous<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        let response = self
            .dispatch(Method::Post, path, Some(body), AuthMode::Anonymous)
            .await?;
        decode(&response)
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        mode: AuthMode,
    ) -> Result<ApiResponse, ClientError> {
        let mut request = ApiRequest::new(method, path, body);
        if mode == AuthMode::Bearer {
            if let Some(stored) = self.credentials.load()? {
                request = request.with_bearer(stored.credential.into_secret());
            }
        }
        debug!(
            "method" = %method,
            "path" = path,
            "authenticated" = request.bearer.is_some(),
            "dispatching request"
        );

        let outcome = tokio::time::timeout(self.timeout, self.backend.execute(request)).await;
        let response = match outcome {
            Err(_elapsed) => return Err(ClientError::Timeout(self.timeout)),
            Ok(Err(BackendFailure::Timeout)) => return Err(ClientError::Timeout(self.timeout)),
            Ok(Err(BackendFailure::Network(detail))) => {
                return Err(ClientError::NetworkUnavailable(detail))
            }
            Ok(Ok(response)) => response,
        };

        if response.is_success() {
            return Ok(response);
        }
        match (mode, response.status) {
            (AuthMode::Bearer, 401) => {
                warn!("path" = path, "authentication rejected, expiring session");
                if let Err(err) = self.credentials.clear() {
                    warn!(%err, "failed to clear credentials after rejection");
                }
                self.session.expire();
                Err(ClientError::AuthExpired)
            }
            (AuthMode::Anonymous, 401 | 403) => {
                Err(ClientError::InvalidCredentials(error_detail(&response)))
            }
            (_, status) => Err(ClientError::ServerError {
                status,
                detail: error_detail(&response),
            }),
        }
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body).map_err(|err| ClientError::Validation(err.to_string()))
}

fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ClientError> {
    serde_json::from_str(&response.body).map_err(|err| ClientError::ServerError {
        status: response.status,
        detail: format!("unexpected response body: {err}"),
    })
}

fn error_detail(response: &ApiResponse) -> String {
    if let Ok(ErrorBody { detail }) = serde_json::from_str::<ErrorBody>(&response.body) {
        return match detail {
            Value::String(text) => text,
            other => other.to_string(),
        };
    }
    let raw = response.body.trim();
    if !raw.is_empty() {
        return raw.to_string();
    }
    reqwest::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("unknown error")
        .to_string()
}

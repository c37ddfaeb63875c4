use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCredentials,
    AuthExpired,
    NetworkUnavailable,
    Timeout,
    ServerError,
    ValidationError,
    InvalidState,
    Storage,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("session expired, log in again")]
    AuthExpired,
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server error (HTTP {status}): {detail}")]
    ServerError { status: u16, detail: String },
    #[error("{0}")]
    Validation(String),
    #[error("a message is already being sent")]
    SendInProgress,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("`{operation}` is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("no conversation is open")]
    NoConversation,
    #[error("credential storage failure: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            Self::AuthExpired => ErrorKind::AuthExpired,
            Self::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::Validation(_) | Self::SendInProgress => ErrorKind::ValidationError,
            Self::NotAuthenticated | Self::InvalidState { .. } | Self::NoConversation => {
                ErrorKind::InvalidState
            }
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials(detail) if !detail.is_empty() => detail.clone(),
            Self::InvalidCredentials(_) => "Invalid username or password.".to_string(),
            Self::AuthExpired => "Your session has expired. Please log in again.".to_string(),
            Self::NetworkUnavailable(_) => {
                "The server is unreachable. Check your connection and try again.".to_string()
            }
            Self::Timeout(_) => "The server took too long to answer. Try again.".to_string(),
            Self::ServerError { detail, .. } => format!("The server reported an error: {detail}"),
            Self::Validation(detail) => detail.clone(),
            Self::SendInProgress => "Wait for the current reply before sending again.".to_string(),
            Self::NotAuthenticated => "Log in first.".to_string(),
            Self::InvalidState { .. } => self.to_string(),
            Self::NoConversation => "Open a chat first.".to_string(),
            Self::Storage(_) => "Could not access the local credential store.".to_string(),
        }
    }
}

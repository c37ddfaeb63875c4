use crate::chat::ChatSession;
use crate::credentials::{Credential, CredentialStore};
use crate::error::ClientError;
use crate::model::{LoginRequest, LoginResponse, UserProfile};
use crate::transport::{AuthenticatedTransport, LOGIN_PATH, ME_PATH};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Authentication state machine:
/// `Unauthenticated -> Authenticating -> Authenticated -> Expired -> Unauthenticated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated(UserProfile),
    Expired,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated(_) => "authenticated",
            Self::Expired => "expired",
        }
    }
}

#[derive(Clone)]
pub struct SessionSignal {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unauthenticated);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, state: SessionState) {
        let previous = self.tx.send_replace(state);
        let current = self.tx.borrow();
        if previous.name() != current.name() {
            info!(
                "from" = previous.name(),
                "to" = current.name(),
                "session state changed"
            );
        }
    }

    /// Swaps in a fresh profile only while the same user is signed in.
    pub(crate) fn refresh_profile(&self, profile: &UserProfile) -> bool {
        self.tx.send_if_modified(|state| match state {
            SessionState::Authenticated(current) if current.id == profile.id => {
                *current = profile.clone();
                true
            }
            _ => false,
        })
    }

    /// Only a live session can expire; other states are left alone.
    pub(crate) fn expire(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if state.is_authenticated() {
                *state = SessionState::Expired;
                true
            } else {
                false
            }
        });
        if changed {
            info!("from" = "authenticated", "to" = "expired", "session state changed");
        }
    }
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SessionManager {
    transport: AuthenticatedTransport,
    credentials: CredentialStore,
    signal: SessionSignal,
    chat: ChatSession,
}

impl SessionManager {
    pub fn new(
        transport: AuthenticatedTransport,
        credentials: CredentialStore,
        signal: SessionSignal,
        chat: ChatSession,
    ) -> Self {
        Self {
            transport,
            credentials,
            signal,
            chat,
        }
    }

    pub fn state(&self) -> SessionState {
        self.signal.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.signal.subscribe()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.signal.current().profile().cloned()
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, ClientError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ClientError::Validation(
                "username and password are required".to_string(),
            ));
        }
        let state = self.signal.current();
        if !matches!(state, SessionState::Unauthenticated | SessionState::Expired) {
            return Err(ClientError::InvalidState {
                operation: "login",
                state: state.name(),
            });
        }

        self.signal.set(SessionState::Authenticating);
        let outcome = self
            .transport
            .post_anonymous::<_, LoginResponse>(LOGIN_PATH, &LoginRequest { username, password })
            .await;
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "login failed");
                self.signal.set(SessionState::Unauthenticated);
                return Err(err);
            }
        };

        let credential = Credential::new(response.access_token, response.token_type);
        if let Err(err) = self.credentials.save(&credential, &response.user) {
            self.signal.set(SessionState::Unauthenticated);
            return Err(err);
        }
        info!("user" = %response.user.username, "logged in");
        self.signal
            .set(SessionState::Authenticated(response.user.clone()));
        self.chat.open()?;
        Ok(response.user)
    }

    pub fn restore_session(&self) -> Result<SessionState, ClientError> {
        match self.credentials.load()? {
            Some(stored) => {
                info!("user" = %stored.profile.username, "restored cached session");
                self.signal.set(SessionState::Authenticated(stored.profile));
                self.chat.open()?;
            }
            None => self.signal.set(SessionState::Unauthenticated),
        }
        Ok(self.signal.current())
    }

    /// Re-validate the session against `/api/auth/me`. A 401 here expires the
    /// session through the transport.
    pub async fn refresh_current_user(&self) -> Result<UserProfile, ClientError> {
        let state = self.signal.current();
        let Some(user_id) = state.profile().map(|profile| profile.id.clone()) else {
            return Err(ClientError::InvalidState {
                operation: "refresh_current_user",
                state: state.name(),
            });
        };
        let profile: UserProfile = self.transport.get(ME_PATH).await?;
        // The session may have been logged out or handed to another user meanwhile.
        if profile.id != user_id
            || !self.credentials.update_profile(&profile)?
            || !self.signal.refresh_profile(&profile)
        {
            warn!("user" = %profile.username, "discarding profile for a session that is gone");
            return Err(ClientError::NotAuthenticated);
        }
        Ok(profile)
    }

    /// Valid from every state; calling it twice is harmless.
    pub fn logout(&self) -> Result<(), ClientError> {
        self.chat.close();
        let cleared = self.credentials.clear();
        self.signal.set(SessionState::Unauthenticated);
        cleared
    }
}

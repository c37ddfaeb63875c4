use crate::chat::{ChatSession, FailedSendPolicy};
use crate::config::ClientSettings;
use crate::credentials::{CredentialStore, FileStorage, SecureStorage};
use crate::error::ClientError;
use crate::messages::MessageStore;
use crate::session::{SessionManager, SessionSignal, SessionState};
use crate::transport::{AuthenticatedTransport, HttpBackend, ReqwestBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct ClientContext {
    credentials: CredentialStore,
    session: SessionManager,
}

impl ClientContext {
    pub fn init(settings: &ClientSettings) -> Result<Self, ClientError> {
        let storage = FileStorage::new(&settings.storage_dir)?;
        let backend = ReqwestBackend::new(&settings.backend_url, settings.request_timeout)?;
        let context = Self::from_parts(
            Arc::new(storage),
            Arc::new(backend),
            settings.request_timeout,
            settings.failed_send_policy,
        );
        let state = context.session.restore_session()?;
        info!(
            "backend" = %settings.backend_url,
            "state" = state.name(),
            "client initialized"
        );
        Ok(context)
    }

    pub fn from_parts(
        storage: Arc<dyn SecureStorage>,
        backend: Arc<dyn HttpBackend>,
        timeout: Duration,
        policy: FailedSendPolicy,
    ) -> Self {
        let credentials = CredentialStore::new(storage);
        let signal = SessionSignal::new();
        let transport =
            AuthenticatedTransport::new(backend, credentials.clone(), signal.clone(), timeout);
        let chat = ChatSession::new(transport.clone(), signal.clone(), MessageStore::new(), policy);
        let session = SessionManager::new(transport, credentials.clone(), signal, chat);
        Self {
            credentials,
            session,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn chat(&self) -> &ChatSession {
        self.session.chat()
    }

    pub fn messages(&self) -> &MessageStore {
        self.session.chat().messages()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Closes the chat surface. Credentials stay so the next start restores.
    pub fn dispose(self) {
        self.session.chat().close();
    }
}

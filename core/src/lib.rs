pub mod chat;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fake;
pub mod messages;
pub mod model;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use chat::{generate_session_id, ChatSession, FailedSendPolicy};
pub use client::ClientContext;
pub use config::{ClientConfigError, ClientSettings};
pub use credentials::{Credential, CredentialStore, FileStorage, MemoryStorage, SecureStorage};
pub use error::{ClientError, ErrorKind};
pub use messages::{ChatSnapshot, MessageStore};
pub use model::{DeliveryStatus, Message, MessageRole, UserProfile};
pub use session::{SessionManager, SessionSignal, SessionState};
pub use transport::{AuthenticatedTransport, HttpBackend, ReqwestBackend};

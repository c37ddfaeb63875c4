mod chat_tests;

use mal0_core::fake::FakeBackend;
use mal0_core::transport::DEFAULT_TIMEOUT;
use mal0_core::{ClientContext, FailedSendPolicy, MemoryStorage, SecureStorage};
use std::sync::Arc;

pub(crate) fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

pub(crate) fn context_with(
    backend: Arc<FakeBackend>,
    storage: Arc<dyn SecureStorage>,
    policy: FailedSendPolicy,
) -> ClientContext {
    ClientContext::from_parts(storage, backend, DEFAULT_TIMEOUT, policy)
}

pub(crate) fn context(backend: Arc<FakeBackend>) -> ClientContext {
    context_with(
        backend,
        Arc::new(MemoryStorage::default()),
        FailedSendPolicy::Keep,
    )
}

pub(crate) fn agent_backend() -> Arc<FakeBackend> {
    Arc::new(FakeBackend::with_user("agent1", "correct"))
}

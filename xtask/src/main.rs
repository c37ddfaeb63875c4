use anyhow::{anyhow, ensure, Result};
use clap::{Parser, Subcommand};
use mal0_core::fake::FakeBackend;
use mal0_core::transport::DEFAULT_TIMEOUT;
use mal0_core::{telemetry, ClientContext, FailedSendPolicy, FileStorage};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for MAL0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in, chat, restart and log out against the in-process fake backend.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;
    let backend = Arc::new(FakeBackend::with_user("smoke", "smoke-password"));
    let open = |backend: Arc<FakeBackend>| -> Result<ClientContext> {
        let storage = FileStorage::new(temp_dir.path())?;
        Ok(ClientContext::from_parts(
            Arc::new(storage),
            backend,
            DEFAULT_TIMEOUT,
            FailedSendPolicy::Keep,
        ))
    };

    let context = open(backend.clone())?;
    let profile = runtime
        .block_on(context.session().login("smoke", "smoke-password"))
        .map_err(|err| anyhow!(err.user_message()))?;
    info!("user" = %profile.username, "logged in");

    let reply = runtime
        .block_on(context.chat().send("ping from xtask"))
        .map_err(|err| anyhow!(err.user_message()))?;
    info!("reply" = %reply.content, "emotion" = ?reply.emotion, "chat round trip");

    let history = runtime
        .block_on(context.chat().fetch_history())
        .map_err(|err| anyhow!(err.user_message()))?;
    ensure!(history.len() == 2, "expected 2 history records, got {}", history.len());
    context.dispose();

    let restarted = open(backend.clone())?;
    let before = backend.request_count();
    let state = restarted.session().restore_session()?;
    ensure!(state.is_authenticated(), "cached session was not restored");
    ensure!(backend.request_count() == before, "restore touched the network");
    info!("state" = state.name(), "session restored from disk");

    restarted.session().logout()?;
    ensure!(
        !restarted.credentials().has_credential(),
        "logout left a credential behind"
    );
    info!("requests" = backend.request_count(), "smoke test finished");

    Ok(())
}

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use mal0::{run_chat, run_login, run_logout, run_whoami};
use mal0_core::{telemetry, ClientContext, ClientSettings};
use std::io::{self, BufRead};
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::runtime::Runtime;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "mal0", version, about = "Talk to the MAL0 assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Backend base URL, overriding mal0.yaml and MAL0_BACKEND_URL.
    #[arg(long, global = true)]
    backend: Option<Url>,
    /// Directory holding the stored credential.
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session.
    Login {
        username: String,
        #[arg(long, env = "MAL0_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Show the logged-in user, re-validated against the server.
    Whoami,
    /// Forget the stored session.
    Logout,
    /// Interactive chat on stdin.
    Chat,
}

fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("warn")?;
    let cli = Cli::parse();

    let mut settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    if let Some(backend) = cli.backend.clone() {
        settings.backend_url = backend;
    }
    if let Some(dir) = cli.storage_dir.clone() {
        settings.storage_dir = dir;
    }

    let runtime = Runtime::new()?;
    let context = ClientContext::init(&settings)
        .map_err(|err| anyhow!(err.user_message()))
        .context("failed to start the client")?;
    let outcome = runtime.block_on(dispatch(cli.command, &context));
    context.dispose();
    outcome
}

async fn dispatch(command: Command, context: &ClientContext) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    match command {
        Command::Login { username, password } => {
            if context.state().is_authenticated() {
                context.session().logout()?;
            }
            let password = match password {
                Some(password) => password,
                None => read_password_line()?,
            };
            run_login(context, &username, &password, &mut stdout).await
        }
        Command::Whoami => run_whoami(context, &mut stdout).await,
        Command::Logout => run_logout(context, &mut stdout),
        Command::Chat => {
            let stdin = BufReader::new(tokio::io::stdin());
            run_chat(context, stdin, &mut stdout).await
        }
    }
}

fn read_password_line() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

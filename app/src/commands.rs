use crate::render::{error_line, message_line, profile_summary, state_summary};
use anyhow::{anyhow, Result};
use mal0_core::{ClientContext, ClientError};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

pub async fn run_login<W: Write>(
    context: &ClientContext,
    username: &str,
    password: &str,
    out: &mut W,
) -> Result<()> {
    match context.session().login(username, password).await {
        Ok(profile) => {
            writeln!(out, "Welcome, {}", profile_summary(&profile))?;
            Ok(())
        }
        Err(err) => Err(anyhow!(error_line(&err))),
    }
}

/// Shows the cached identity, then re-validates it with the server.
pub async fn run_whoami<W: Write>(context: &ClientContext, out: &mut W) -> Result<()> {
    if !context.state().is_authenticated() {
        writeln!(out, "{}", state_summary(&context.state()))?;
        return Ok(());
    }
    match context.session().refresh_current_user().await {
        Ok(_) => writeln!(out, "{}", state_summary(&context.state()))?,
        Err(err @ (ClientError::NetworkUnavailable(_) | ClientError::Timeout(_))) => {
            writeln!(out, "{} (offline: {})", state_summary(&context.state()), error_line(&err))?
        }
        Err(err) => return Err(anyhow!(error_line(&err))),
    }
    Ok(())
}

pub fn run_logout<W: Write>(context: &ClientContext, out: &mut W) -> Result<()> {
    context.session().logout()?;
    writeln!(out, "Logged out.")?;
    Ok(())
}

pub async fn run_history<W: Write>(context: &ClientContext, out: &mut W) -> Result<()> {
    let history = context
        .chat()
        .fetch_history()
        .await
        .map_err(|err| anyhow!(error_line(&err)))?;
    if history.is_empty() {
        writeln!(out, "(no messages yet)")?;
    }
    for message in &history {
        writeln!(out, "{}", message_line(message))?;
    }
    Ok(())
}

/// Line-oriented chat. Each input line is sent as one message; `/history`
/// prints the server copy of the conversation and `/quit` ends the loop.
pub async fn run_chat<R, W>(context: &ClientContext, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    if !context.state().is_authenticated() {
        return Err(anyhow!(error_line(&ClientError::NotAuthenticated)));
    }
    if !context.chat().is_open() {
        context.chat().open()?;
    }
    writeln!(out, "Chatting with MAL0. /history shows the log, /quit leaves.")?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/history" => run_history(context, out).await?,
            text => match context.chat().send(text).await {
                Ok(reply) => writeln!(out, "{}", message_line(&reply))?,
                Err(err) => {
                    debug!(%err, "send failed");
                    writeln!(out, "! {}", error_line(&err))?;
                    if !context.state().is_authenticated() {
                        break;
                    }
                }
            },
        }
    }
    Ok(())
}

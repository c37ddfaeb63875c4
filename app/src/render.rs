use mal0_core::{ClientError, ErrorKind, Message, MessageRole, SessionState, UserProfile};

pub fn role_badge(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "You",
        MessageRole::Assistant => "MAL0",
    }
}

pub fn message_line(message: &Message) -> String {
    let time = message.timestamp.format("%H:%M");
    let mut line = format!("[{time}] {}: {}", role_badge(message.role), message.content);
    if let Some(emotion) = message.emotion.as_deref() {
        line.push_str(&format!(" ({emotion})"));
    }
    if message.is_failed() {
        line.push_str(" [not delivered]");
    }
    line
}

pub fn profile_summary(profile: &UserProfile) -> String {
    let status = if profile.is_active { "active" } else { "disabled" };
    format!(
        "{} (clearance level {}, {status}, member since {})",
        profile.username,
        profile.clearance_level,
        profile.created_at.format("%Y-%m-%d")
    )
}

pub fn state_summary(state: &SessionState) -> String {
    match state {
        SessionState::Authenticated(profile) => format!("logged in as {}", profile_summary(profile)),
        SessionState::Expired => "session expired, run `mal0 login` again".to_string(),
        other => other.name().to_string(),
    }
}

/// One-line error for the terminal, with a hint when re-login is needed.
pub fn error_line(err: &ClientError) -> String {
    match err.kind() {
        ErrorKind::AuthExpired => format!("{} Run `mal0 login`.", err.user_message()),
        _ => err.user_message(),
    }
}

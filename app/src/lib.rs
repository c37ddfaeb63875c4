pub mod commands;
pub mod render;

pub use commands::{run_chat, run_history, run_login, run_logout, run_whoami};

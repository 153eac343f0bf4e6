//! Built-in `JobAction` implementations.

pub mod log_message;
pub mod shell_command;

pub use log_message::LogMessageAction;
pub use shell_command::ShellCommandAction;

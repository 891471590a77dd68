pub mod commands;
pub mod handlers;

pub use commands::{AssistantsArgs, AssistantsCommand, CliArgs, Commands, StateArgs, StateCommand};
pub use handlers::{handle_assistants, handle_state};

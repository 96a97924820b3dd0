#![cfg(feature = "integration")]

mod common;

#[path = "integration/cli_commands.rs"]
mod cli_commands;
#[path = "integration/completions.rs"]
mod completions;
#[path = "integration/foreign_listener.rs"]
mod foreign_listener;
#[path = "integration/start_stop.rs"]
mod start_stop;
#[path = "integration/stop_completeness.rs"]
mod stop_completeness;
#[path = "integration/validate_command.rs"]
mod validate_command;

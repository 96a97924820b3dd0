pub mod cli;
pub mod commands;
pub mod config;
pub mod orchestrator;
pub mod platform;
pub mod stats;
pub mod ui;

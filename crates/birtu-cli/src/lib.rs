//! Birtu CLI library
//!
//! Components of the `birtu` command-line client: configuration, the stored session,
//! and the listen loop that routes pushed events to the terminal.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::{BirtuApp, TerminalNotificationSink};
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};

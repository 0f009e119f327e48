//! Error handling for the Birtu CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Birtu core error: {0}")]
    BirtuCore(#[from] birtu_core::BirtuError),

    #[error("Session persistence error: {0}")]
    Session(#[from] birtu_core::PersistenceError),

    #[error("Channel error: {0}")]
    Channel(#[from] birtu_realtime::ChannelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not logged in; run `birtu login` first")]
    NotLoggedIn,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

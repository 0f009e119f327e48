//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Data directory for the stored session
    #[arg(short, long, global = true)]
    pub data_dir: Option<String>,

    /// API base URL the real-time address is derived from
    #[arg(long, global = true)]
    pub base_url: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Store a session for the given user
    Login {
        /// Server-assigned user id
        #[arg(short, long)]
        user_id: String,
        /// Bearer token returned by the login API
        #[arg(short, long)]
        token: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// customer, driver or admin
        #[arg(long, default_value = "customer")]
        role: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the stored identity
    Whoami,
    /// Connect and print pushed notifications until Ctrl+C
    Listen,
    /// Print the real-time address for the stored identity
    Endpoint,
}

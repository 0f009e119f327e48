//! Command handlers for the Birtu CLI

use tracing::info;

use birtu_core::{Identity, UserProfile, UserRole};

use crate::app::BirtuApp;
use crate::cli::Commands;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, mut app: BirtuApp) -> Result<()> {
        match command {
            Commands::Login {
                user_id,
                token,
                name,
                phone,
                email,
                role,
            } => {
                let identity = Self::build_identity(user_id, token, name, phone, email, &role)?;
                Self::handle_login_command(&mut app, identity)
            }
            Commands::Logout => Self::handle_logout_command(&mut app),
            Commands::Whoami => {
                println!("{}", Self::describe_identity(app.identity()));
                Ok(())
            }
            Commands::Listen => app.listen().await,
            Commands::Endpoint => {
                println!("{}", app.endpoint()?);
                Ok(())
            }
        }
    }

    fn handle_login_command(app: &mut BirtuApp, identity: Identity) -> Result<()> {
        let user_id = identity.user_id().clone();
        app.login(identity)?;
        println!("Logged in as {}", user_id);
        Ok(())
    }

    fn handle_logout_command(app: &mut BirtuApp) -> Result<()> {
        match app.identity().map(|identity| identity.user_id().clone()) {
            Some(user_id) => {
                app.logout()?;
                println!("Logged out {}", user_id);
            }
            None => {
                app.logout()?;
                info!("No session to clear");
                println!("Not logged in");
            }
        }
        Ok(())
    }

    /// Assemble the identity a `login` command describes
    pub fn build_identity(
        user_id: String,
        token: String,
        name: Option<String>,
        phone: Option<String>,
        email: Option<String>,
        role: &str,
    ) -> Result<Identity> {
        if user_id.trim().is_empty() {
            return Err(CliError::InvalidArgument("user id must not be empty".to_string()));
        }
        if token.trim().is_empty() {
            return Err(CliError::InvalidArgument("token must not be empty".to_string()));
        }
        let role: UserRole = role.parse().map_err(CliError::InvalidArgument)?;

        let mut user = UserProfile::new(user_id, role);
        user.name = name.unwrap_or_default();
        user.phone = phone;
        user.email = email;
        Ok(Identity::new(user, token))
    }

    /// Human-readable summary for `whoami`
    pub fn describe_identity(identity: Option<&Identity>) -> String {
        let Some(identity) = identity else {
            return "Not logged in".to_string();
        };
        let user = &identity.user;
        let mut line = format!("{} ({})", user.id, user.role.as_str());
        if !user.name.is_empty() {
            line = format!("{} {}", user.name, line);
        }
        if let Some(phone) = &user.phone {
            line.push_str(&format!(", phone {}", phone));
        }
        if let Some(email) = &user.email {
            line.push_str(&format!(", email {}", email));
        }
        line
    }
}

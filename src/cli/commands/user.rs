use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use super::parse_object;
use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::models::User;
use crate::services::{CreateUserRequest, UpdateUserRequest};

#[derive(Subcommand)]
pub enum UserCommands {
    #[command(about = "Create a user and add it to an organization")]
    Create {
        #[arg(help = "Primary email")]
        email: String,

        #[arg(help = "Display name")]
        name: String,

        #[arg(long, help = "Remote ID of the organization the user joins")]
        org: String,

        #[arg(long, help = "Username (derived from the email when omitted)")]
        username: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long, env = "ORGSYNC_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        #[arg(long = "role", help = "Remote role ID to assign; repeatable")]
        roles: Vec<String>,

        #[arg(long, help = "Additional attributes as a JSON object")]
        data: Option<String>,
    },

    #[command(about = "Update a user's profile")]
    Update {
        #[arg(help = "Local user ID")]
        id: Uuid,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long, help = "Attributes to merge as a JSON object")]
        data: Option<String>,
    },

    #[command(about = "Delete a user")]
    Delete { id: Uuid },

    #[command(about = "Suspend a single user")]
    Suspend { id: Uuid },

    #[command(about = "Reactivate a single user")]
    Reactivate { id: Uuid },
}

pub async fn handle(cmd: UserCommands, session: &Session) -> anyhow::Result<()> {
    let users = &session.services.users;
    let format = &session.format;

    match cmd {
        UserCommands::Create {
            email,
            name,
            org,
            username,
            phone,
            password,
            roles,
            data,
        } => {
            let request = CreateUserRequest {
                username,
                email,
                name,
                phone,
                password,
                organization_id: org,
                role_ids: roles,
                custom_data: parse_object(data.as_deref())?,
            };
            let user = users.create_user(&session.actor, request).await?;
            print_user(format, &format!("Created user '{}'", user.username), &user)
        }

        UserCommands::Update {
            id,
            name,
            email,
            phone,
            data,
        } => {
            let custom_data = match data {
                Some(raw) => Some(parse_object(Some(&raw))?),
                None => None,
            };
            let request = UpdateUserRequest {
                name,
                email,
                phone,
                custom_data,
            };
            let user = users.update_user(&session.actor, id, request).await?;
            print_user(format, &format!("Updated user '{}'", user.username), &user)
        }

        UserCommands::Delete { id } => {
            users.delete_user(&session.actor, id).await?;
            output_success(format, &format!("Deleted user {}", id), Some(json!({ "id": id })))
        }

        UserCommands::Suspend { id } => {
            let user = users.suspend_user(&session.actor, id).await?;
            print_user(format, &format!("Suspended user '{}'", user.username), &user)
        }

        UserCommands::Reactivate { id } => {
            let user = users.reactivate_user(&session.actor, id).await?;
            print_user(format, &format!("Reactivated user '{}'", user.username), &user)
        }
    }
}

fn print_user(format: &OutputFormat, message: &str, user: &User) -> anyhow::Result<()> {
    if let OutputFormat::Text = format {
        println!("✓ {}", message);
        println!("  id:           {}", user.id);
        println!("  remote id:    {}", user.remote_id.as_deref().unwrap_or("-"));
        println!("  organization: {}", user.organization_id);
        return Ok(());
    }
    output_success(format, message, Some(json!({ "user": user })))
}

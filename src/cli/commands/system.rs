use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::services::CreateSystemRequest;

#[derive(Subcommand)]
pub enum SystemCommands {
    #[command(about = "Register a system; prints its secret once")]
    Create {
        name: String,

        #[arg(long = "type", help = "System type, e.g. ns8 or nsec")]
        system_type: String,

        #[arg(long, help = "Remote ID of the owning organization (defaults to the actor's)")]
        org: Option<String>,
    },

    #[command(about = "Delete a system")]
    Delete { id: Uuid },
}

pub async fn handle(cmd: SystemCommands, session: &Session) -> anyhow::Result<()> {
    let systems = &session.services.systems;
    let format = &session.format;

    match cmd {
        SystemCommands::Create { name, system_type, org } => {
            let request = CreateSystemRequest {
                name,
                system_type,
                organization_id: org,
            };
            let registered = systems.create_system(&session.actor, request).await?;
            let system = &registered.system;

            match format {
                OutputFormat::Text => {
                    println!("✓ Registered system '{}'", system.name);
                    println!("  id:      {}", system.id);
                    println!("  owner:   {}", system.creator_org_id);
                    println!("  secret:  {}", registered.secret);
                    println!("The secret is not stored and will not be shown again.");
                    Ok(())
                }
                OutputFormat::Json => output_success(
                    format,
                    &format!("Registered system '{}'", system.name),
                    Some(json!({ "system": system, "secret": registered.secret })),
                ),
            }
        }

        SystemCommands::Delete { id } => {
            systems.delete_system(&session.actor, id).await?;
            output_success(format, &format!("Deleted system {}", id), Some(json!({ "id": id })))
        }
    }
}

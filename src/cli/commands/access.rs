use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};

#[derive(Subcommand)]
pub enum AccessCommands {
    #[command(about = "List organizations the actor may act on")]
    Orgs,

    #[command(about = "List systems the actor may act on")]
    Systems,

    #[command(about = "Check whether an organization is within the actor's reach")]
    Check {
        #[arg(help = "Remote ID of the target organization")]
        target: String,
    },
}

pub async fn handle(cmd: AccessCommands, session: &Session) -> anyhow::Result<()> {
    let hierarchy = &session.services.hierarchy;
    let actor = &session.actor;
    let format = &session.format;

    match cmd {
        AccessCommands::Orgs => {
            let ids = hierarchy.allowed_organization_ids(actor.role, &actor.org_id).await?;
            output_list(format, "organizations", "No organizations in reach", ids.iter())
        }

        AccessCommands::Systems => {
            let ids = hierarchy.allowed_system_ids(actor.role, &actor.org_id).await?;
            output_list(format, "systems", "No systems in reach", ids.iter())
        }

        AccessCommands::Check { target } => {
            let allowed = hierarchy.is_in_hierarchy(actor.role, &actor.org_id, &target).await?;
            let lineage = hierarchy.resolver().lineage(&target).await?;

            match format {
                OutputFormat::Json => output_success(
                    format,
                    if allowed { "allowed" } else { "denied" },
                    Some(json!({ "target": target, "allowed": allowed, "lineage": lineage })),
                ),
                OutputFormat::Text => {
                    let verdict = if allowed { "✓ allowed" } else { "✗ denied" };
                    println!("{}: {} for {} {}", verdict, target, actor.role, actor.org_id);
                    if !lineage.is_empty() {
                        println!("  lineage: {}", lineage.join(" <- "));
                    }
                    Ok(())
                }
            }
        }
    }
}

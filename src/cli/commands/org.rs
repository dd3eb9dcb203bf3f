use clap::Subcommand;
use serde_json::{json, Value};
use uuid::Uuid;

use super::parse_object;
use crate::cli::utils::*;
use crate::cli::{OutputFormat, Session};
use crate::database::models::attributes::KEY_VAT;
use crate::database::models::Organization;
use crate::services::{CascadeReport, CreateOrganizationRequest, UpdateOrganizationRequest};
use crate::types::OrgKind;

#[derive(Subcommand)]
pub enum OrgCommands {
    #[command(about = "Create an organization in the identity provider and locally")]
    Create {
        #[arg(help = "Organization kind: distributor, reseller or customer")]
        kind: OrgKind,

        #[arg(help = "Organization name")]
        name: String,

        #[arg(long, default_value = "", help = "Free-text description")]
        description: String,

        #[arg(long, help = "Remote ID of the parent organization (defaults to the actor's)")]
        parent: Option<String>,

        #[arg(long, help = "VAT number")]
        vat: Option<String>,

        #[arg(long, help = "Additional attributes as a JSON object")]
        data: Option<String>,
    },

    #[command(about = "Update an organization's name, description or attributes")]
    Update {
        kind: OrgKind,

        #[arg(help = "Local organization ID")]
        id: Uuid,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        vat: Option<String>,

        #[arg(long, help = "Attributes to merge as a JSON object")]
        data: Option<String>,
    },

    #[command(about = "Delete an organization and everything beneath it")]
    Delete {
        kind: OrgKind,

        #[arg(help = "Local organization ID")]
        id: Uuid,
    },

    #[command(about = "Suspend an organization and its subtree")]
    Suspend {
        #[arg(help = "Local organization ID")]
        id: Uuid,
    },

    #[command(about = "Reactivate an organization and what its suspension cascaded to")]
    Reactivate {
        #[arg(help = "Local organization ID")]
        id: Uuid,
    },
}

pub async fn handle(cmd: OrgCommands, session: &Session) -> anyhow::Result<()> {
    let organizations = &session.services.organizations;
    let format = &session.format;

    match cmd {
        OrgCommands::Create {
            kind,
            name,
            description,
            parent,
            vat,
            data,
        } => {
            let mut custom_data = parse_object(data.as_deref())?;
            if let Some(vat) = vat {
                custom_data.insert(KEY_VAT.to_string(), Value::String(vat));
            }
            let request = CreateOrganizationRequest {
                name,
                description,
                custom_data,
                parent_id: parent,
            };

            let org = organizations.create_organization(&session.actor, kind, request).await?;
            print_organization(format, &format!("Created {} '{}'", kind, org.name), &org)
        }

        OrgCommands::Update {
            kind,
            id,
            name,
            description,
            vat,
            data,
        } => {
            let mut custom_data = parse_object(data.as_deref())?;
            if let Some(vat) = vat {
                custom_data.insert(KEY_VAT.to_string(), Value::String(vat));
            }
            let request = UpdateOrganizationRequest {
                name,
                description,
                custom_data,
            };

            let org = organizations.update_organization(&session.actor, id, kind, request).await?;
            print_organization(format, &format!("Updated {} '{}'", kind, org.name), &org)
        }

        OrgCommands::Delete { kind, id } => {
            let report = organizations.delete_organization(&session.actor, id, kind).await?;

            if let OutputFormat::Text = format {
                for failure in &report.failures {
                    eprintln!("  warning: {}", failure);
                }
            }
            output_success(
                format,
                &format!(
                    "Deleted {} {} ({} organizations, {} users, {} systems beneath it)",
                    kind, id, report.organizations, report.users, report.systems
                ),
                Some(json!({ "id": id, "cascade": report })),
            )
        }

        OrgCommands::Suspend { id } => {
            let report = session.services.cascade.suspend(&session.actor, id).await?;
            print_cascade(format, &format!("Suspended organization {}", id), &report)
        }

        OrgCommands::Reactivate { id } => {
            let report = session.services.cascade.reactivate(&session.actor, id).await?;
            print_cascade(format, &format!("Reactivated organization {}", id), &report)
        }
    }
}

fn print_organization(format: &OutputFormat, message: &str, org: &Organization) -> anyhow::Result<()> {
    if let OutputFormat::Text = format {
        println!("✓ {}", message);
        println!("  id:        {}", org.id);
        println!("  remote id: {}", org.remote_id.as_deref().unwrap_or("-"));
        println!("  parent:    {}", org.parent_id().unwrap_or("-"));
        return Ok(());
    }
    output_success(format, message, Some(json!({ "organization": org })))
}

fn print_cascade(format: &OutputFormat, message: &str, report: &CascadeReport) -> anyhow::Result<()> {
    if let OutputFormat::Text = format {
        println!("✓ {}", message);
        println!(
            "  {} organizations, {} users, {} systems affected",
            report.organizations, report.users, report.systems
        );
        for failure in &report.remote_failures {
            eprintln!("  warning: {}", failure);
        }
        return Ok(());
    }
    output_success(format, message, Some(json!({ "cascade": report })))
}

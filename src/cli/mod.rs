pub mod commands;
pub mod utils;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::{DatabaseManager, PgStore};
use crate::idp::HttpIdentityProvider;
use crate::services::Services;
use crate::types::{Actor, Role};

#[derive(Parser)]
#[command(name = "orgsync")]
#[command(about = "Organization hierarchy sync between the local store and the identity provider")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, env = "ORGSYNC_ACTOR_ORG", help = "Remote ID of the acting organization")]
    pub actor_org: Option<String>,

    #[arg(long, global = true, env = "ORGSYNC_ACTOR_ROLE", help = "Role of the acting organization")]
    pub actor_role: Option<String>,

    #[arg(long, global = true, env = "ORGSYNC_ACTOR_USER", default_value = "cli", help = "Acting user ID, recorded in logs")]
    pub actor_user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply database migrations")]
    Migrate,

    #[command(about = "Distributor, reseller and customer organizations")]
    Org {
        #[command(subcommand)]
        cmd: commands::org::OrgCommands,
    },

    #[command(about = "Users of an organization")]
    User {
        #[command(subcommand)]
        cmd: commands::user::UserCommands,
    },

    #[command(about = "Provisioned systems")]
    System {
        #[command(subcommand)]
        cmd: commands::system::SystemCommands,
    },

    #[command(about = "Hierarchy access queries")]
    Access {
        #[command(subcommand)]
        cmd: commands::access::AccessCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Everything a subcommand needs to act
pub struct Session {
    pub services: Services,
    pub actor: Actor,
    pub format: OutputFormat,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::from_cli(&cli);
    let config = crate::config::config();

    let Cli {
        actor_org,
        actor_role,
        actor_user,
        command,
        ..
    } = cli;

    if let Commands::Migrate = command {
        return commands::migrate::handle(config, &format).await;
    }

    let actor = actor_from(actor_org, actor_role, actor_user)?;
    let session = Session {
        services: connect(config).await?,
        actor,
        format,
    };

    match command {
        Commands::Migrate => Ok(()),
        Commands::Org { cmd } => commands::org::handle(cmd, &session).await,
        Commands::User { cmd } => commands::user::handle(cmd, &session).await,
        Commands::System { cmd } => commands::system::handle(cmd, &session).await,
        Commands::Access { cmd } => commands::access::handle(cmd, &session).await,
    }
}

fn actor_from(org: Option<String>, role: Option<String>, user: String) -> anyhow::Result<Actor> {
    let org = org.context("--actor-org (or ORGSYNC_ACTOR_ORG) is required")?;
    let role: Role = role
        .context("--actor-role (or ORGSYNC_ACTOR_ROLE) is required")?
        .parse()?;
    Ok(Actor::new(user, org, role))
}

async fn connect(config: &AppConfig) -> anyhow::Result<Services> {
    let pool = DatabaseManager::connect(&config.database).await?;
    let store = Arc::new(PgStore::new(pool));
    let idp = Arc::new(HttpIdentityProvider::new(&config.idp)?);
    Ok(Services::new(store, idp, config))
}

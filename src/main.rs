use clap::Parser;
use tracing_subscriber::EnvFilter;

use orgsync::cli::{self, utils::output_error, Cli, OutputFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL and IDP_* are picked up
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orgsync=warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_format = OutputFormat::from_cli(&cli);
    tracing::debug!("running in {:?} mode", orgsync::config::config().environment);

    if let Err(e) = cli::run(cli).await {
        match std::env::var("CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => eprintln!("Error: {e:?}"),
            _ => output_error(&output_format, &e)?,
        }
        std::process::exit(1);
    }

    Ok(())
}

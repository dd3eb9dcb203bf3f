use serde_json::json;
use tracing::info;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::DatabaseManager;

pub async fn handle(config: &AppConfig, output_format: &OutputFormat) -> anyhow::Result<()> {
    let pool = DatabaseManager::connect(&config.database).await?;
    DatabaseManager::migrate(&pool).await?;
    DatabaseManager::health_check(&pool).await?;
    info!("migrations applied");

    output_success(
        output_format,
        "Database migrations applied",
        Some(json!({ "database": config.database.redacted_url() })),
    )
}

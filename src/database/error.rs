use thiserror::Error;

/// Errors from the local store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation; the message names the offending field
    #[error("{0}")]
    Conflict(String),

    #[error("Remote ID already assigned to {entity} {id}")]
    RemoteIdAlreadyAssigned { entity: &'static str, id: String },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

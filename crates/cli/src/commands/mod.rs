pub mod migrate;
pub mod quote;

use secrecy::SecretString;

/// Errors from CLI commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid {0}: {1}")]
    Invalid(&'static str, String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Repository(#[from] dosirak_server::db::RepositoryError),

    #[error(transparent)]
    Order(#[from] dosirak_core::OrderError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),
}

/// Database URL from `DOSIRAK_DATABASE_URL`, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, CommandError> {
    let _ = dotenvy::dotenv();
    std::env::var("DOSIRAK_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("DOSIRAK_DATABASE_URL"))
}

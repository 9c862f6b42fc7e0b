//! Database migration command.
//!
//! ```bash
//! dosirak-cli migrate
//! ```
//!
//! Migrations live in `crates/server/migrations/` and are embedded at build
//! time. The server never runs them on startup.

use super::{CommandError, database_url};

/// Apply pending migrations to the order database.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails, or
/// a migration fails to apply.
pub async fn run() -> Result<(), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to order database...");
    let pool = dosirak_server::db::create_pool(&database_url).await?;

    tracing::info!("Running order migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Order migrations complete");
    Ok(())
}

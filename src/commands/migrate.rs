use anyhow::Result;
use tracing::info;

use uas_ingest::db::{PgPool, run_migrations};

pub async fn handle_migrate(diesel_pool: PgPool) -> Result<()> {
    info!("Running database migrations");
    let applied = run_migrations(diesel_pool).await?;
    if applied == 0 {
        info!("Database schema is up to date");
    } else {
        info!("Applied {} migrations", applied);
    }
    Ok(())
}

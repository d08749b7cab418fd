use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

/// Connect the shared pool used by the processor, sweeper and health check
pub async fn init_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect(&config.database_url)
        .await
}

/// Apply the outbox schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    outbox::MIGRATOR.run(pool).await
}

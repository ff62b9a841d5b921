// Database - Postgres pool and embedded migrations

use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres};
use std::time::Duration;

/// Connection pool sizing and timeouts
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

impl PoolConfig {
    /// Defaults overridden by `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`,
    /// `DB_ACQUIRE_TIMEOUT`, `DB_IDLE_TIMEOUT` and `DB_MAX_LIFETIME` (seconds)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_connections: env_u64("DB_MAX_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(defaults.max_connections),
            min_connections: env_u64("DB_MIN_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(defaults.min_connections),
            acquire_timeout: env_u64("DB_ACQUIRE_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: env_u64("DB_IDLE_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime: env_u64("DB_MAX_LIFETIME")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lifetime),
        }
    }
}

/// Connect to Postgres, creating the database first if needed
pub async fn create_pool(database_url: &str, config: PoolConfig) -> anyhow::Result<PgPool> {
    if !Postgres::database_exists(database_url).await? {
        tracing::info!("Database missing, creating it");
        Postgres::create_database(database_url).await?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .connect(database_url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connected to Postgres"
    );

    Ok(pool)
}

/// Apply the embedded migrations in `backend/migrations`
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations applied");
    Ok(())
}

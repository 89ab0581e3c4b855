//! `PostgreSQL` persistence for marquee.
//!
//! [`PostgresStore`] implements [`EntityStore`](marquee_core::store::EntityStore)
//! for movies and reviews, the [`RejectionLedger`](marquee_core::store::RejectionLedger)
//! and the [`ReportSource`](marquee_core::store::ReportSource) over one `sqlx` pool.
//!
//! # Schema
//!
//! Migrations live in `postgres/migrations/` and are embedded with
//! `sqlx::migrate!`. Correlation identities carry a unique constraint that
//! spans soft-deleted rows, which is what makes redelivered intents idempotent.
//!
//! # Example
//!
//! ```no_run
//! use marquee_postgres::{PoolSettings, PostgresStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/marquee", &PoolSettings::default()).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod ledger;
mod movies;
mod query;
mod reports;
mod reviews;

pub use error::PostgresError;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long to wait for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 25,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// `PostgreSQL`-backed store shared by every storage trait.
///
/// Cloning is cheap: the pool is reference counted.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Connect`] if no connection can be established
    /// within the acquire timeout.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(PostgresError::Connect)?;

        tracing::info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::new(pool))
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Migrate`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresError::Migrate)?;
        Ok(())
    }

    /// Round-trip a trivial query, for health checks.
    ///
    /// # Errors
    ///
    /// The classified store error if the database is unreachable.
    pub async fn ping(&self) -> Result<(), marquee_core::store::StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(error::classify)?;
        Ok(())
    }

    /// Borrow the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

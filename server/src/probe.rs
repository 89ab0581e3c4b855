//! Readiness of the data-service's database.

use marquee_postgres::PostgresStore;
use marquee_web::state::{ProbeFuture, ReadinessProbe};

/// Pings `PostgreSQL` on every readiness check.
#[derive(Clone, Debug)]
pub struct DatabaseProbe(PostgresStore);

impl DatabaseProbe {
    /// Probe the pool behind `store`.
    #[must_use]
    pub const fn new(store: PostgresStore) -> Self {
        Self(store)
    }
}

impl ReadinessProbe for DatabaseProbe {
    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(async move { self.0.ping().await.map_err(|e| e.to_string()) })
    }
}

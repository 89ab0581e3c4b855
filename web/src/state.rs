//! Shared state for the two services' handlers.

use crate::forward::DataService;
use axum::extract::FromRef;
use marquee_core::environment::Clock;
use marquee_core::movie::Movie;
use marquee_core::review::Review;
use marquee_core::store::{EntityStore, RejectionLedger, ReportSource};
use marquee_runtime::metrics::MetricsRecorder;
use marquee_runtime::{CorrelationLookup, ProducerGateway};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by [`ReadinessProbe::check`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Dependency check behind `GET /health`.
pub trait ReadinessProbe: Send + Sync {
    /// `Err` carries a short description of what is down.
    fn check(&self) -> ProbeFuture<'_>;
}

/// State of the data-service router.
#[derive(Clone)]
pub struct DataState {
    /// Movie rows.
    pub movies: Arc<dyn EntityStore<Movie>>,
    /// Review rows.
    pub reviews: Arc<dyn EntityStore<Review>>,
    /// Aggregate reports.
    pub reports: Arc<dyn ReportSource>,
    /// Correlation lookup for movie intents.
    pub movie_lookup: CorrelationLookup<Movie>,
    /// Correlation lookup for review intents.
    pub review_lookup: CorrelationLookup<Review>,
    /// Time source for update validation.
    pub clock: Arc<dyn Clock>,
    /// Optional dependency check.
    pub readiness: Option<Arc<dyn ReadinessProbe>>,
    /// Optional Prometheus registry.
    pub metrics: Option<MetricsRecorder>,
}

impl DataState {
    /// Build state over a single backend serving every storage trait.
    #[must_use]
    pub fn new<S>(store: S, clock: Arc<dyn Clock>) -> Self
    where
        S: EntityStore<Movie> + EntityStore<Review> + ReportSource + RejectionLedger + Clone + 'static,
    {
        let ledger: Arc<dyn RejectionLedger> = Arc::new(store.clone());
        Self {
            movies: Arc::new(store.clone()),
            reviews: Arc::new(store.clone()),
            reports: Arc::new(store.clone()),
            movie_lookup: CorrelationLookup::new(
                Arc::new(store.clone()),
                Arc::clone(&ledger),
                Arc::clone(&clock),
            ),
            review_lookup: CorrelationLookup::new(Arc::new(store), ledger, Arc::clone(&clock)),
            clock,
            readiness: None,
            metrics: None,
        }
    }

    /// Override how long an unresolved correlation id reads as pending.
    #[must_use]
    pub fn with_pending_window(mut self, window: Duration) -> Self {
        self.movie_lookup = self.movie_lookup.with_pending_window(window);
        self.review_lookup = self.review_lookup.with_pending_window(window);
        self
    }

    /// Check `probe` on `GET /health`.
    #[must_use]
    pub fn with_readiness(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.readiness = Some(probe);
        self
    }

    /// Serve `recorder` on `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }
}

/// State of the api-service router.
#[derive(Clone)]
pub struct ApiState {
    /// Publishes create intents.
    pub gateway: ProducerGateway,
    /// Receives everything else.
    pub data: Arc<dyn DataService>,
    /// Time source for intake validation.
    pub clock: Arc<dyn Clock>,
    /// Optional Prometheus registry.
    pub metrics: Option<MetricsRecorder>,
}

impl ApiState {
    /// Build api state.
    #[must_use]
    pub fn new(gateway: ProducerGateway, data: Arc<dyn DataService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            data,
            clock,
            metrics: None,
        }
    }

    /// Serve `recorder` on `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }
}

impl FromRef<DataState> for Option<MetricsRecorder> {
    fn from_ref(state: &DataState) -> Self {
        state.metrics.clone()
    }
}

impl FromRef<ApiState> for Option<MetricsRecorder> {
    fn from_ref(state: &ApiState) -> Self {
        state.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync>() {}
        assert_clone::<DataState>();
        assert_clone::<ApiState>();
    }
}

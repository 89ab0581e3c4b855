//! # Marquee Runtime
//!
//! The moving parts of the write-intake pipeline.
//!
//! ```text
//! request layer -> ProducerGateway -> MessageChannel -> ConsumerWorker -> EntityStore
//!                                                                           ^
//! request layer -> CorrelationLookup -----------------------------------------+
//! ```
//!
//! ## Components
//!
//! - [`gateway::ProducerGateway`]: stamps and publishes intents, retrying
//!   transient broker failures within a bounded budget
//! - [`handlers::IntentHandler`]: decodes, validates and applies one message,
//!   classifying the result as applied, already applied or rejected
//! - [`worker::ConsumerWorker`]: the subscribe, process, commit loop with
//!   stall-and-retry on transient store errors and cooperative shutdown
//! - [`lookup::CorrelationLookup`]: resolves a correlation identity to a record,
//!   a recorded rejection, or pending
//! - [`retry`]: backoff schedule shared by the gateway and the workers
//! - [`metrics`]: Prometheus counters and histograms

pub mod gateway;
pub mod handlers;
pub mod lookup;
pub mod metrics;
pub mod retry;
pub mod worker;

pub use gateway::{GatewayError, ProducerGateway, Topics};
pub use handlers::{IntentHandler, MovieHandler, Outcome, Rejection, ReviewHandler};
pub use lookup::{CorrelationLookup, LookupOutcome};
pub use retry::RetryPolicy;
pub use worker::{ConsumerWorker, WorkerState};

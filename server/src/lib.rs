//! Process wiring for the two Marquee services.
//!
//! - `api-service`: validates creates, publishes intents through the
//!   [`marquee_runtime::ProducerGateway`], and relays everything else to the
//!   data-service with [`client::HttpDataService`].
//! - `data-service`: owns `PostgreSQL`, runs one
//!   [`marquee_runtime::ConsumerWorker`] per entity kind, and serves reads,
//!   updates, deletes, reports and correlation lookups.
//!
//! Both read [`config::Config`] from the environment and log through
//! [`telemetry::init`].

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod probe;
pub mod telemetry;

pub use client::HttpDataService;
pub use config::Config;
pub use probe::DatabaseProbe;

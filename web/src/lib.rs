//! HTTP surfaces of the Marquee services.
//!
//! Two routers share this crate:
//!
//! - [`routes::api_router`]: the write intake. `POST /api/movies` and
//!   `POST /api/reviews` validate the body, publish a mutation intent and
//!   answer `202 Accepted` with a correlation identity. Every other `/api/`
//!   request is relayed to the data-service through a [`forward::DataService`].
//! - [`routes::data_router`]: reads, partial updates, soft deletes, reports and
//!   correlation lookups, served straight from the store.
//!
//! ```text
//! client -> api-service --publish--> channel --consume--> worker -> store
//!               |                                                   ^
//!               +------------- relay --------> data-service --------+
//! ```
//!
//! Errors are rendered by [`AppError`] as `{"code", "message", "errors"?}`.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod forward;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use extractors::{CORRELATION_ID_HEADER, EXPECTED_VERSION_HEADER, ExpectedVersion, RequestCorrelation};
pub use forward::{DataService, ForwardError, ForwardRequest, ForwardedResponse, LocalDataService};
pub use routes::{api_router, data_router};
pub use state::{ApiState, DataState, ReadinessProbe};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

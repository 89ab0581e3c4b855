//! api-service: write intake and relay.
//!
//! ```bash
//! REDPANDA_BROKERS=localhost:9092 DATA_SERVICE_URL=http://localhost:8081 cargo run --bin api-service
//! ```

use marquee_core::environment::SystemClock;
use marquee_redpanda::RedpandaChannel;
use marquee_runtime::metrics::MetricsRecorder;
use marquee_runtime::{ProducerGateway, RetryPolicy};
use marquee_server::lifecycle::{
    run_until_shutdown, shutdown_signal, spawn_metrics_listener, spawn_server, stopped,
};
use marquee_server::{Config, HttpDataService, telemetry};
use marquee_web::{ApiState, api_router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Per-request timeout of the relay to the data-service.
const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    telemetry::init()?;
    info!("Starting api-service");

    let recorder = MetricsRecorder::install()?;

    let channel = RedpandaChannel::builder()
        .brokers(&config.redpanda.brokers)
        .timeout(config.redpanda.producer_timeout())
        .build()?;
    info!(brokers = %config.redpanda.brokers, "Producer created");

    let gateway = ProducerGateway::new(Arc::new(channel))
        .with_topics(config.redpanda.topics())
        .with_retry_policy(
            RetryPolicy::builder()
                .max_retries(config.redpanda.publish_max_retries)
                .build(),
        );
    let data = HttpDataService::new(&config.server.data_service_url, RELAY_TIMEOUT)?;

    let state = ApiState::new(gateway, Arc::new(data), Arc::new(SystemClock))
        .with_metrics(recorder.clone());

    let (stop, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();
    if let Some(addr) = config.server.metrics_addr() {
        tasks.push(spawn_metrics_listener(addr, recorder, stopped(&stop)).await?);
    }

    let addr = config.server.api_addr();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, data_service = %config.server.data_service_url, "api-service listening");

    let server = spawn_server("api", listener, api_router(state), stopped(&stop));
    if !run_until_shutdown(
        shutdown_signal(),
        server,
        tasks,
        &stop,
        config.server.shutdown_grace(),
    )
    .await
    {
        warn!("Shutdown grace period elapsed before every task stopped");
    }
    info!("api-service stopped");
    Ok(())
}

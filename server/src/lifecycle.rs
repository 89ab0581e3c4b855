//! Process lifecycle: signals, bounded shutdown and the metrics listener.

use axum::Router;
use axum::routing::get;
use marquee_runtime::metrics::MetricsRecorder;
use marquee_web::handlers::health;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Resolve on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Wait for `tasks` to finish, at most `grace` in total.
///
/// Returns `false` if the grace period ran out; unfinished tasks are aborted.
pub async fn join_with_grace(tasks: Vec<JoinHandle<()>>, grace: Duration) -> bool {
    let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
    let all = async {
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!(%error, "Background task failed");
            }
        }
    };

    if tokio::time::timeout(grace, all).await.is_ok() {
        true
    } else {
        tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, aborting tasks");
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

/// A future that resolves once `stop` broadcasts (or every sender is gone).
pub fn stopped(stop: &broadcast::Sender<()>) -> impl Future<Output = ()> + Send + 'static {
    let mut rx = stop.subscribe();
    async move {
        let _ = rx.recv().await;
    }
}

/// Serve `router` on `listener` in a background task, draining on `shutdown`.
pub fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(%error, server = name, "Listener failed");
        }
    })
}

/// Run until `signal` resolves or `server` exits on its own, then broadcast
/// `stop` and give the server and `tasks` one shared `grace` period.
///
/// The deadline starts when shutdown begins, so a stalled HTTP drain cannot
/// hold the process past it. Returns `false` if anything had to be aborted.
pub async fn run_until_shutdown(
    signal: impl Future<Output = ()>,
    mut server: JoinHandle<()>,
    mut tasks: Vec<JoinHandle<()>>,
    stop: &broadcast::Sender<()>,
    grace: Duration,
) -> bool {
    let server_exited = tokio::select! {
        () = signal => false,
        result = &mut server => {
            if let Err(error) = result {
                tracing::warn!(%error, "Server task failed");
            }
            tracing::error!("Server exited before a shutdown signal");
            true
        }
    };

    let _ = stop.send(());
    if !server_exited {
        tasks.push(server);
    }
    join_with_grace(tasks, grace).await
}

/// Router exposing only `GET /metrics`.
pub fn metrics_router(recorder: MetricsRecorder) -> Router {
    Router::new()
        .route("/metrics", get(health::metrics))
        .with_state(Some(recorder))
}

/// Serve [`metrics_router`] on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Fails if the address cannot be bound.
pub async fn spawn_metrics_listener(
    addr: SocketAddr,
    recorder: MetricsRecorder,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Metrics listener bound");
    Ok(spawn_server("metrics", listener, metrics_router(recorder), shutdown))
}

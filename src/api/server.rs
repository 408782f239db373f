use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{dispatch_order, health, record_outcome, tick_disabler, tick_enabler, tick_monitor},
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All routes of the event surface
pub fn router(state: AppState) -> Router {
    let concurrency = state.config.server.concurrency_limit;

    Router::new()
        .route("/outcomes", post(record_outcome))
        .route("/dispatch", post(dispatch_order))
        .route("/ticks/monitor", post(tick_monitor))
        .route("/ticks/disabler", post(tick_disabler))
        .route("/ticks/enabler", post(tick_enabler))
        .route("/health", get(health))
        .with_state(state)
        // gzip bodies from the bus are inflated before the handlers see them
        .layer(RequestDecompressionLayer::new())
        .layer(GlobalConcurrencyLimitLayer::new(concurrency))
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, address: SocketAddr, shutdown: F) -> Result<(), AnyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "HighwayPatrol event surface listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Event surface stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

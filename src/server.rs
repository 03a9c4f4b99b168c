//! HTTP plumbing shared by the stage debug servers.
//!
//! The scheduler, fetcher and processor each expose a small HTTP surface:
//! `GET /` answers `pong` as a liveness probe, plus one stage-specific POST
//! route for running a single task outside the queues.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Liveness probe handler.
pub async fn pong() -> &'static str {
    "pong"
}

/// Serve a stage router until shutdown is signalled.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "http server listening");

    axum::serve(listener, router.layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

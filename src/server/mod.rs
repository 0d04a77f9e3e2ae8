//! HTTP API server for the catalog.

pub mod routes;

use crate::catalog::Catalog;
use crate::metrics::MetricsCollector;
use crate::provider::EmbeddingProvider;
use std::sync::{Arc, RwLock};

/// Shared application state for the HTTP server.
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub metrics: RwLock<MetricsCollector>,
}

/// Start the HTTP server and block until shutdown. The catalog is
/// snapshotted once the listener winds down.
pub async fn start(
    addr: &str,
    catalog: Arc<Catalog>,
    provider: Arc<dyn EmbeddingProvider>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        catalog: Arc::clone(&catalog),
        provider,
        metrics: RwLock::new(MetricsCollector::new()),
    });

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    catalog.save()?;
    println!("Catalog saved");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => println!("Shutting down"),
        Err(e) => {
            // Without a signal handler there is no graceful path; serve
            // until the process is killed.
            eprintln!("Failed to install shutdown handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

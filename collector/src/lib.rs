pub mod api;
pub mod config;
pub mod connection_cache;
pub mod gate;
pub mod metrics_defs;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use crate::config::{Config, ValidationError};
use crate::connection_cache::ConnectionCache;
use crate::gate::SubmissionGate;
use crate::store::{ConnectionError, StoreError};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::watch;

#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs the feedback API and the admin listener until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<(), CollectorError> {
    run_until(config, shutdown_signal()).await
}

/// Like `run`, stopping both listeners once `shutdown` resolves.
pub async fn run_until<F>(config: Config, shutdown: F) -> Result<(), CollectorError>
where
    F: Future<Output = ()>,
{
    config.validate()?;

    let connector = store::get_connector(&config.store)?;
    let connections = Arc::new(ConnectionCache::new(connector));
    warm_up(connections.clone());

    let gate = Arc::new(SubmissionGate::from_config(connections.clone(), &config));
    let app = api::router(gate, &config);

    let listener =
        TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port)).await?;
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        schema = config.schema.as_str(),
        rate_limit_window_secs = ?config.rate_limit.window().map(|w| w.as_secs()),
        "Feedback API listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_shutdown = wait_for_shutdown(shutdown_rx.clone());
    let api_task = async move {
        api::serve(listener, app, api_shutdown)
            .await
            .map_err(CollectorError::from)
    };

    let readiness = connections.clone();
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, CollectorError>::new(move || readiness.is_ready()),
        wait_for_shutdown(shutdown_rx),
    );

    let signal_task = async {
        shutdown.await;
        let _ = shutdown_tx.send(true);
        Ok::<(), CollectorError>(())
    };

    let result = tokio::try_join!(api_task, admin_task, signal_task);
    connections.close();
    tracing::info!("Feedback collector stopped");

    result.map(|_| ())
}

/// Opens one connection to the configured store and reads from it.
pub async fn check_store(config: Config) -> Result<(), CollectorError> {
    let connector = store::get_connector(&config.store)?;
    tracing::info!(store = %connector.describe(), "Attempting to connect to the document store");

    let connections = ConnectionCache::new(connector);
    let store = connections.acquire().await?;
    let newest = store.list(1).await?;
    connections.close();

    tracing::info!(
        newest = ?newest.first().map(|record| record.timestamp),
        "Document store connection ok"
    );
    Ok(())
}

// A failed warm-up only shows in readiness, the next request reconnects.
fn warm_up(connections: Arc<ConnectionCache>) {
    tokio::spawn(async move {
        if connections.acquire().await.is_err() {
            tracing::warn!("Document store unavailable at startup, requests will retry");
        }
    });
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::jobs::QueueClient;
use crate::providers::{ProviderManager, manager};
use crate::store::SqliteStore;
use crate::writer::Writer;
use crate::{cleanup, db, server};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(config: Config) -> Result<()> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let manager = Arc::new(ProviderManager::from_config(&config).context("building provider registry")?);
    manager.refresh_health(config.writer.request_timeout()).await;
    for (name, status) in manager.providers_status() {
        info!(provider = %name, available = status.available, model = %status.model, "provider registered");
    }

    let queue = QueueClient::from_config(&config.queue)
        .context("building queue client")?
        .map(Arc::new);
    if queue.is_none() {
        warn!("[queue].base_url not set, newsletter job endpoints will answer 503");
    }
    if config.user.is_empty() {
        warn!("no [[user]] entries configured, every API request will be rejected");
    }

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let writer = Arc::new(Writer::new(manager.clone(), store, config.writer.clone()));
    let cancel = CancellationToken::new();

    let background = vec![
        tokio::spawn(manager::health_loop(
            manager.clone(),
            config.health_check_interval(),
            cancel.clone(),
        )),
        tokio::spawn(cleanup::cleanup_loop(
            pool.clone(),
            config.usage_retention(),
            cancel.clone(),
        )),
    ];

    let router = server::build_router(server::AppState {
        writer,
        queue,
        users: Arc::new(config.user.clone()),
    });
    let listener = tokio::net::TcpListener::bind(&config.fluxao.listen)
        .await
        .with_context(|| format!("binding to {}", config.fluxao.listen))?;
    info!(listen = %config.fluxao.listen, "HTTP server listening");

    let shutdown = cancel.clone().cancelled_owned();
    let server = tokio::spawn(async move { axum::serve(listener, router).with_graceful_shutdown(shutdown).await });

    wait_for_shutdown().await;
    info!("shutdown signal received, draining");
    cancel.cancel();

    // In-flight provider calls are not cancelled, they get a bounded grace period.
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        for handle in background {
            let _ = handle.await;
        }
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "HTTP server stopped with error"),
            Err(e) => warn!(error = %e, "HTTP server task panicked"),
            Ok(Ok(())) => {}
        }
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "shutdown grace period elapsed with tasks still running");
    }

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, waiting for Ctrl-C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

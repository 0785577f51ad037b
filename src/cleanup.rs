use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Usage retention cleanup loop. Wakes every hour.
pub async fn cleanup_loop(pool: SqlitePool, retention: Duration, cancel: CancellationToken) {
    info!(retention_days = retention.as_secs() / 86_400, "usage cleanup job started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("usage cleanup job shutting down");
                return;
            }
            _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
        }

        match purge_usage(&pool, retention).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "cleaned up old provider usage rows"),
            Err(e) => error!(error = %e, "usage cleanup failed"),
        }
    }
}

/// Delete usage rows whose UTC day lies entirely before `now - retention`.
pub async fn purge_usage(pool: &SqlitePool, retention: Duration) -> anyhow::Result<u64> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(30));
    let cutoff = (Utc::now() - retention).date_naive();
    store::delete_usage_before(pool, cutoff).await
}

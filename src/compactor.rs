use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::queue::QueueEngine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the queue WAL once `threshold` appends
/// have accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<QueueEngine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true when a compaction ran.
pub async fn compact_if_needed(engine: &QueueEngine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    debug!(appends, threshold, "compacting queue WAL");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            // Next tick retries
            error!("queue WAL compaction failed after {appends} appends: {e}");
            false
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the journal once `threshold` records have
/// been appended since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns the number of records written when a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not needed");
        return None;
    }
    match engine.compact_wal().await {
        Ok(records) => {
            info!(appends, records, "journal compacted");
            Some(records)
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            None
        }
    }
}

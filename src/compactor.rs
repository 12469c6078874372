use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that rewrites the WAL once `threshold` records have been
/// appended since the last compaction. Checks every `period`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "WAL compacted");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("resledger_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path).unwrap();

        let eid = Ulid::new();
        engine
            .create_event(eid, "Standup".into(), String::new(), Span::new(0, 1000))
            .await
            .unwrap();
        for i in 1..=4 {
            engine
                .reschedule_event(eid, Span::new(i * 1000, i * 1000 + 500))
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let event = engine.event_info(eid).await.unwrap();
        assert_eq!(event.span, Span::new(4000, 4500));
    }

    #[tokio::test]
    async fn background_task_compacts() {
        let path = test_wal_path("background.wal");
        let engine = Arc::new(Engine::new(path).unwrap());
        let rid = Ulid::new();
        engine
            .create_resource(rid, "Room A".into(), "room".into())
            .await
            .unwrap();

        let handle = tokio::spawn(run_compactor(engine.clone(), 1, Duration::from_millis(10)));
        for _ in 0..200 {
            if engine.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_resources().await.len(), 1);
        handle.abort();
    }
}

//! Administrative operations and the periodic retention task

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::service::EventService;
use crate::error::Result;

impl EventService {
    /// Checkpoint and compact the database
    pub async fn vacuum(&self) -> Result<()> {
        self.blocking(|store| store.vacuum()).await
    }

    /// Delete events older than `older_than_days`; returns the number removed
    pub async fn retention_sweep(&self, older_than_days: u32) -> Result<usize> {
        self.blocking(move |store| store.retention_sweep(older_than_days))
            .await
    }
}

/// Sweep events older than `days` every `interval` until `cancel` fires.
///
/// The first sweep runs immediately. Failures are logged and the next tick
/// tries again.
pub fn spawn_retention_task(
    service: Arc<EventService>,
    days: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(days, interval_secs = interval.as_secs(), "retention task started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match service.retention_sweep(days).await {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, days, "retention sweep"),
                        Err(e) => warn!(error = %e, "retention sweep failed"),
                    }
                }
            }
        }
        info!("retention task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::websocket::BroadcastHub;
    use crate::event_store::{ConnectionConfig, EventStore};
    use crate::types::{EventFilter, HookEventType, NewEvent};
    use crate::utils::{ManualClock, DAY_MS};
    use serde_json::Map;

    #[tokio::test]
    async fn test_retention_task_sweeps_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(50 * DAY_MS));
        let store = EventStore::with_clock(
            dir.path().join("events.db"),
            &ConnectionConfig::default(),
            clock.clone(),
        )
        .unwrap();
        store
            .insert(&NewEvent::new("app", "s", HookEventType::Stop, Map::new()))
            .unwrap();
        clock.advance(10 * DAY_MS);

        let service = Arc::new(EventService::new(
            Arc::new(store),
            Arc::new(BroadcastHub::default()),
        ));
        let cancel = CancellationToken::new();
        let handle = spawn_retention_task(
            Arc::clone(&service),
            7,
            Duration::from_millis(20),
            cancel.clone(),
        );

        let mut remaining = u64::MAX;
        for _ in 0..100 {
            remaining = service.query(EventFilter::new()).await.unwrap().total;
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(remaining, 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_vacuum_via_service() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            EventStore::open(dir.path().join("events.db"), &ConnectionConfig::default()).unwrap();
        let service = EventService::new(Arc::new(store), Arc::new(BroadcastHub::default()));
        service.vacuum().await.unwrap();
        assert_eq!(service.retention_sweep(30).await.unwrap(), 0);
    }
}

//! Broadcast hub: fan-out of stored events to observer sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::session::{CloseReason, DeliveryError, ObserverSession, SessionId};
use crate::protocol::ServerMessage;
use crate::types::StoredEvent;

/// Default per-session send buffer, in frames
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Sessions that accepted the event
    pub delivered: usize,
    /// Sessions removed because they could not accept it
    pub dropped: usize,
    /// Sessions not subscribed to this event type
    pub skipped: usize,
}

/// Registry of connecting and open observer sessions
///
/// Owned by the application state and passed to whoever needs it; there is
/// no process-wide instance.
pub struct BroadcastHub {
    sessions: RwLock<HashMap<SessionId, Arc<ObserverSession>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer,
        }
    }

    /// Allocate a `Connecting` session that is not yet registered
    pub fn create_session(&self) -> (Arc<ObserverSession>, mpsc::Receiver<Arc<String>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ObserverSession::new(id, self.buffer)
    }

    /// Register a `Connecting` session so pushes are held for it
    pub fn register(&self, session: &Arc<ObserverSession>) {
        self.sessions.write().insert(session.id, Arc::clone(session));
        debug!(session_id = session.id, "observer session registered");
    }

    /// Queue the initial frame and open a registered session.
    ///
    /// `newest_id` is the newest event id in the snapshot behind `initial`;
    /// held pushes at or below it are already in the snapshot and are
    /// discarded.
    pub fn open_session(
        &self,
        session: &Arc<ObserverSession>,
        initial: Arc<String>,
        newest_id: i64,
    ) -> Result<(), DeliveryError> {
        let released = session.open_with(initial, newest_id)?;
        debug!(session_id = session.id, newest_id, released, "observer session open");
        Ok(())
    }

    /// Push a stored event to every registered, subscribed session.
    ///
    /// Sessions still `Connecting` hold the event until they open.
    /// Never blocks: sessions whose buffer is full or whose writer is gone
    /// are closed and removed instead of being waited on.
    pub fn fan_out(&self, event: &StoredEvent) -> FanOutReport {
        let frame = match ServerMessage::Event(event.clone()).to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(id = event.id, error = %e, "failed to serialize event");
                return FanOutReport::default();
            }
        };

        let targets: Vec<Arc<ObserverSession>> = self.sessions.read().values().cloned().collect();

        let mut report = FanOutReport::default();
        let mut failed = Vec::new();
        for session in targets {
            if !session.wants(event.event_type) {
                report.skipped += 1;
                continue;
            }
            match session.offer(event.id, Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::NotOpen) => report.skipped += 1,
                Err(e) => {
                    let reason = match e {
                        DeliveryError::Full => CloseReason::Backpressure,
                        _ => CloseReason::ClientClosed,
                    };
                    warn!(session_id = session.id, error = %e, "dropping observer session");
                    session.begin_close(reason);
                    failed.push(session.id);
                }
            }
        }

        if !failed.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &failed {
                sessions.remove(id);
            }
            report.dropped = failed.len();
        }

        debug!(
            id = event.id,
            delivered = report.delivered,
            dropped = report.dropped,
            skipped = report.skipped,
            "fan-out"
        );
        report
    }

    /// Unregister a session; returns it if it was registered
    pub fn remove(&self, id: SessionId) -> Option<Arc<ObserverSession>> {
        self.sessions.write().remove(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Close every session with "going away"
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.begin_close(CloseReason::Shutdown);
        }
        info!(sessions = drained.len(), "broadcast hub shut down");
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::websocket::session::SessionState;
    use crate::types::HookEventType;
    use chrono::Utc;
    use serde_json::Map;

    fn stored(id: i64, event_type: HookEventType) -> StoredEvent {
        let now = Utc::now();
        StoredEvent {
            id,
            source_app: "app".into(),
            session_id: "s".into(),
            event_type,
            payload: Map::new(),
            chat: None,
            summary: None,
            timestamp: crate::utils::format_timestamp(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn open(
        hub: &BroadcastHub,
    ) -> (Arc<ObserverSession>, mpsc::Receiver<Arc<String>>) {
        let (session, mut rx) = hub.create_session();
        hub.register(&session);
        hub.open_session(&session, Arc::new("initial".into()), 0).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_str(), "initial");
        (session, rx)
    }

    #[tokio::test]
    async fn test_fan_out_reaches_open_sessions() {
        let hub = BroadcastHub::default();
        let (_a, mut rx_a) = open(&hub);
        let (_b, mut rx_b) = open(&hub);

        let report = hub.fan_out(&stored(7, HookEventType::Stop));
        assert_eq!(report.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.unwrap();
            let msg: ServerMessage = serde_json::from_str(&frame).unwrap();
            assert!(matches!(msg, ServerMessage::Event(e) if e.id == 7));
        }
    }

    #[test]
    fn test_unregistered_sessions_get_nothing() {
        let hub = BroadcastHub::default();
        let (_session, mut rx) = hub.create_session();
        let report = hub.fan_out(&stored(1, HookEventType::Stop));
        assert_eq!(report, FanOutReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_connecting_session_only_gets_events_newer_than_snapshot() {
        let hub = BroadcastHub::default();
        let (session, mut rx) = hub.create_session();
        hub.register(&session);

        // 1 and 2 are stored before the snapshot is read, 3 after
        for id in 1..=3 {
            assert_eq!(hub.fan_out(&stored(id, HookEventType::Stop)).delivered, 1);
        }
        assert!(rx.try_recv().is_err());

        hub.open_session(&session, Arc::new("initial".into()), 2).unwrap();
        hub.fan_out(&stored(4, HookEventType::Stop));

        assert_eq!(rx.try_recv().unwrap().as_str(), "initial");
        for expected in [3, 4] {
            let msg: ServerMessage = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert!(matches!(msg, ServerMessage::Event(e) if e.id == expected));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_connecting_session_overflow_is_dropped() {
        let hub = BroadcastHub::new(2);
        let (session, _rx) = hub.create_session();
        hub.register(&session);
        hub.fan_out(&stored(1, HookEventType::Stop));
        let report = hub.fan_out(&stored(2, HookEventType::Stop));
        assert_eq!(report.dropped, 1);
        assert_eq!(session.close_reason(), Some(CloseReason::Backpressure));
        assert!(!hub.contains(session.id));
    }

    #[test]
    fn test_stalled_session_is_dropped_without_blocking_others() {
        let hub = BroadcastHub::new(1);
        let (_fast_a, mut rx_a) = open(&hub);
        let (_fast_b, mut rx_b) = open(&hub);
        let (stalled, _rx_stalled) = open(&hub);
        // fill the stalled session's single slot
        stalled.try_deliver(Arc::new("backlog".into())).unwrap();

        let report = hub.fan_out(&stored(1, HookEventType::PreToolUse));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert_eq!(stalled.state(), SessionState::Closing);
        assert_eq!(stalled.close_reason(), Some(CloseReason::Backpressure));
        assert!(!hub.contains(stalled.id));
        assert_eq!(hub.session_count(), 2);
    }

    #[tokio::test]
    async fn test_stalled_session_reaches_closed() {
        let hub = BroadcastHub::new(1);
        let (_a, mut rx_a) = open(&hub);
        let (_b, mut rx_b) = open(&hub);
        let (stalled, _rx_stalled) = open(&hub);
        stalled.try_deliver(Arc::new("backlog".into())).unwrap();

        // stands in for the socket task: never drains, only tears down
        let teardown = {
            let session = Arc::clone(&stalled);
            tokio::spawn(async move {
                session.cancelled().await;
                session.mark_closed();
            })
        };

        let report = hub.fan_out(&stored(1, HookEventType::Stop));
        assert_eq!(report.delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        teardown.await.unwrap();
        assert_eq!(stalled.state(), SessionState::Closed);
        assert_eq!(stalled.close_reason(), Some(CloseReason::Backpressure));
    }

    #[test]
    fn test_subscription_filters_pushes() {
        let hub = BroadcastHub::default();
        let (session, mut rx) = open(&hub);
        session.subscribe([HookEventType::Stop]);

        let report = hub.fan_out(&stored(1, HookEventType::PreToolUse));
        assert_eq!(report.skipped, 1);
        assert!(rx.try_recv().is_err());

        hub.fan_out(&stored(2, HookEventType::Stop));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let hub = BroadcastHub::default();
        let (a, _rx_a) = open(&hub);
        let (b, _rx_b) = open(&hub);
        hub.shutdown();
        assert_eq!(hub.session_count(), 0);
        for s in [a, b] {
            assert_eq!(s.close_reason(), Some(CloseReason::Shutdown));
        }
    }

    #[test]
    fn test_hubs_are_isolated() {
        let first = BroadcastHub::default();
        let second = BroadcastHub::default();
        let (_s, _rx) = open(&first);
        assert_eq!(first.session_count(), 1);
        assert_eq!(second.session_count(), 0);
    }
}

//! Observer session state
//!
//! A session moves `Connecting → Open → Closing → Closed` and never goes
//! back. Outbound frames go through a bounded channel that a per-socket
//! writer task drains; the hub only ever uses `try_send` on it.
//!
//! While `Connecting`, pushed events are held on the session instead of
//! queued. Opening queues the `initial` frame first and then releases the
//! held events the snapshot does not already contain.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::types::HookEventType;

/// Hub-assigned session identifier
pub type SessionId = u64;

/// Lifecycle of one observer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session left `Open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The observer went away or its socket failed
    ClientClosed,
    /// The observer fell behind and its send buffer filled up
    Backpressure,
    /// The server is shutting down
    Shutdown,
    /// The session could not be set up, e.g. the snapshot query failed
    ServerError,
}

impl CloseReason {
    /// WebSocket close code sent to the observer
    pub fn close_code(self) -> u16 {
        match self {
            CloseReason::ClientClosed => 1000,
            // "try again later": connectors reconnect and take a fresh snapshot
            CloseReason::Backpressure => 1013,
            CloseReason::Shutdown => 1001,
            CloseReason::ServerError => 1011,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "closed",
            CloseReason::Backpressure => "send buffer full",
            CloseReason::Shutdown => "server shutting down",
            CloseReason::ServerError => "server error",
        }
    }
}

/// Failure to hand a frame to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("session is not open")]
    NotOpen,
    #[error("session send buffer is full")]
    Full,
    #[error("session writer has gone away")]
    Closed,
}

/// One connected observer
pub struct ObserverSession {
    pub id: SessionId,
    state: AtomicU8,
    tx: mpsc::Sender<Arc<String>>,
    /// Pushes that arrived while `Connecting`, by event id; `None` once opened
    held: Mutex<Option<Vec<(i64, Arc<String>)>>>,
    held_capacity: usize,
    /// Newest event id covered by the initial snapshot
    snapshot_floor: AtomicI64,
    /// `None` receives every event type
    subscriptions: Mutex<Option<HashSet<HookEventType>>>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    dropped: AtomicU64,
    connected_at: Instant,
}

impl std::fmt::Debug for ObserverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl ObserverSession {
    /// Create a session in `Connecting` with a send buffer of `buffer` frames
    pub fn new(id: SessionId, buffer: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let session = Arc::new(Self {
            id,
            state: AtomicU8::new(SessionState::Connecting as u8),
            tx,
            held: Mutex::new(Some(Vec::new())),
            // one slot of the send buffer is kept for the initial frame
            held_capacity: buffer.saturating_sub(1),
            snapshot_floor: AtomicI64::new(0),
            subscriptions: Mutex::new(None),
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
        });
        (session, rx)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// `Connecting → Open`; false if the session already moved on
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closing` and stop the writer.
    ///
    /// Only the first reason is kept. Returns false if the session was
    /// already closing or closed.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.close_reason.lock().get_or_insert(reason);
        self.cancel.cancel();
        true
    }

    /// Final state once the socket is gone
    pub fn mark_closed(&self) {
        self.close_reason.lock().get_or_insert(CloseReason::ClientClosed);
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the session starts closing
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Queue a frame unless the session is closing.
    ///
    /// Used for replies and the initial snapshot, which may be queued before
    /// the session is open.
    pub fn enqueue(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        if self.state() >= SessionState::Closing {
            return Err(DeliveryError::NotOpen);
        }
        self.tx.try_send(frame).map_err(|e| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            }
        })
    }

    /// Queue a pushed event; only `Open` sessions accept pushes
    pub fn try_deliver(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::NotOpen);
        }
        self.enqueue(frame)
    }

    /// Queue a pushed event, or hold it while the session is `Connecting`
    pub fn offer(&self, id: i64, frame: Arc<String>) -> Result<(), DeliveryError> {
        {
            let mut held = self.held.lock();
            if let Some(held) = held.as_mut() {
                if self.state() >= SessionState::Closing {
                    return Err(DeliveryError::NotOpen);
                }
                if held.len() >= self.held_capacity {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(DeliveryError::Full);
                }
                held.push((id, frame));
                return Ok(());
            }
        }
        // stored before the snapshot was read but fanned out after it opened
        if id <= self.snapshot_floor.load(Ordering::Acquire) {
            return Ok(());
        }
        self.try_deliver(frame)
    }

    /// `Connecting → Open`: queue `initial`, then every held event with an id
    /// above `newest_id`, in arrival order.
    ///
    /// Runs under the held-events lock, so a concurrent `offer` either lands
    /// in the held list before this or is queued after it. Returns the number
    /// of released events.
    pub fn open_with(&self, initial: Arc<String>, newest_id: i64) -> Result<usize, DeliveryError> {
        let mut held = self.held.lock();
        let pending = held.take().unwrap_or_default();
        self.snapshot_floor.store(newest_id, Ordering::Release);
        self.enqueue(initial)?;
        let mut released = 0;
        for (id, frame) in pending {
            if id > newest_id {
                self.enqueue(frame)?;
                released += 1;
            }
        }
        if !self.mark_open() {
            return Err(DeliveryError::NotOpen);
        }
        Ok(released)
    }

    /// Whether pushes of `event_type` should reach this session
    pub fn wants(&self, event_type: HookEventType) -> bool {
        self.subscriptions
            .lock()
            .as_ref()
            .map_or(true, |types| types.contains(&event_type))
    }

    /// Add event types to the subscription; an empty list resets to all types
    pub fn subscribe(&self, event_types: impl IntoIterator<Item = HookEventType>) {
        let event_types: Vec<_> = event_types.into_iter().collect();
        let mut subs = self.subscriptions.lock();
        if event_types.is_empty() {
            *subs = None;
        } else {
            subs.get_or_insert_with(HashSet::new).extend(event_types);
        }
    }

    /// Stop receiving the given event types
    pub fn unsubscribe(&self, event_types: impl IntoIterator<Item = HookEventType>) {
        let mut subs = self.subscriptions.lock();
        let set = subs.get_or_insert_with(|| HookEventType::ALL.into_iter().collect());
        for event_type in event_types {
            set.remove(&event_type);
        }
    }

    /// Current subscription, sorted; `None` means every type
    pub fn subscriptions(&self) -> Option<Vec<HookEventType>> {
        self.subscriptions.lock().as_ref().map(|types| {
            let mut types: Vec<_> = types.iter().copied().collect();
            types.sort();
            types
        })
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Arc<String> {
        Arc::new(text.to_string())
    }

    #[test]
    fn test_state_transitions() {
        let (session, _rx) = ObserverSession::new(1, 4);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.mark_open());
        assert!(!session.mark_open());
        assert!(session.begin_close(CloseReason::Backpressure));
        assert!(!session.begin_close(CloseReason::Shutdown));
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(session.close_reason(), Some(CloseReason::Backpressure));
        session.mark_closed();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.close_reason(), Some(CloseReason::Backpressure));
    }

    #[tokio::test]
    async fn test_pushes_require_open() {
        let (session, mut rx) = ObserverSession::new(1, 4);
        assert_eq!(session.try_deliver(frame("early")), Err(DeliveryError::NotOpen));
        session.enqueue(frame("initial")).unwrap();
        session.mark_open();
        session.try_deliver(frame("event")).unwrap();

        assert_eq!(rx.recv().await.unwrap().as_str(), "initial");
        assert_eq!(rx.recv().await.unwrap().as_str(), "event");
    }

    #[tokio::test]
    async fn test_held_pushes_follow_initial() {
        let (session, mut rx) = ObserverSession::new(1, 8);
        session.offer(4, frame("e4")).unwrap();
        session.offer(5, frame("e5")).unwrap();
        session.offer(6, frame("e6")).unwrap();
        assert!(rx.try_recv().is_err());

        // the snapshot already has everything up to 5
        assert_eq!(session.open_with(frame("initial"), 5).unwrap(), 1);
        // already in the snapshot
        session.offer(5, frame("e5 again")).unwrap();
        session.offer(7, frame("e7")).unwrap();

        for expected in ["initial", "e6", "e7"] {
            assert_eq!(rx.recv().await.unwrap().as_str(), expected);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_held_pushes_are_bounded() {
        let (session, _rx) = ObserverSession::new(1, 3);
        session.offer(1, frame("a")).unwrap();
        session.offer(2, frame("b")).unwrap();
        assert_eq!(session.offer(3, frame("c")), Err(DeliveryError::Full));
        assert_eq!(session.dropped_count(), 1);
    }

    #[test]
    fn test_open_with_fails_after_close() {
        let (session, _rx) = ObserverSession::new(1, 4);
        session.begin_close(CloseReason::ServerError);
        assert_eq!(
            session.open_with(frame("initial"), 0),
            Err(DeliveryError::NotOpen)
        );
        assert_eq!(session.offer(1, frame("a")), Err(DeliveryError::NotOpen));
    }

    #[test]
    fn test_full_buffer_counts_drop() {
        let (session, _rx) = ObserverSession::new(1, 1);
        session.mark_open();
        session.try_deliver(frame("a")).unwrap();
        assert_eq!(session.try_deliver(frame("b")), Err(DeliveryError::Full));
        assert_eq!(session.dropped_count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (session, rx) = ObserverSession::new(1, 4);
        session.mark_open();
        drop(rx);
        assert_eq!(session.try_deliver(frame("a")), Err(DeliveryError::Closed));
    }

    #[test]
    fn test_nothing_queued_after_closing() {
        let (session, _rx) = ObserverSession::new(1, 4);
        session.mark_open();
        session.begin_close(CloseReason::ClientClosed);
        assert_eq!(session.enqueue(frame("late")), Err(DeliveryError::NotOpen));
    }

    #[test]
    fn test_subscriptions() {
        let (session, _rx) = ObserverSession::new(1, 4);
        assert!(session.wants(HookEventType::Stop));

        session.subscribe([HookEventType::PreToolUse]);
        assert!(session.wants(HookEventType::PreToolUse));
        assert!(!session.wants(HookEventType::Stop));

        session.subscribe([HookEventType::Stop]);
        assert_eq!(
            session.subscriptions(),
            Some(vec![HookEventType::PreToolUse, HookEventType::Stop])
        );

        session.subscribe(Vec::new());
        assert_eq!(session.subscriptions(), None);

        session.unsubscribe([HookEventType::Notification]);
        assert!(!session.wants(HookEventType::Notification));
        assert!(session.wants(HookEventType::SubagentStop));
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::Backpressure.close_code(), 1013);
        assert_eq!(CloseReason::Shutdown.close_code(), 1001);
        assert_eq!(CloseReason::ClientClosed.close_code(), 1000);
        assert_eq!(CloseReason::ServerError.close_code(), 1011);
    }
}

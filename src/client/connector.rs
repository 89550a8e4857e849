//! Resilient realtime connector
//!
//! Keeps one WebSocket link to the broadcast hub alive across network
//! failures. Outbound messages sent while the link is down wait in a bounded
//! outbox and are flushed, oldest first, once the link is back.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──handshake──► Open
//!      ▲                          │                      │
//!      │        backoff           │ error                │ close / error / heartbeat timeout
//!      └──────────────────────────┴──────────────────────┘
//! ```
//!
//! Every task the connector spawns hangs off one `CancellationToken`;
//! [`Connector::close`] cancels it and waits for the driver to finish.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::outbox::{Outbox, Pending};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::HookEventType;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector settings
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Hub endpoint, e.g. `ws://127.0.0.1:4000/stream`
    pub url: String,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub backoff_factor: f64,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long to wait for a `pong` before declaring the link dead
    pub heartbeat_timeout: Duration,
    pub outbox_capacity: usize,
    /// Failed deliveries after which a queued message is dropped
    pub max_message_retries: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000/stream".to_string(),
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 10,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            outbox_capacity: 100,
            max_message_retries: 3,
        }
    }
}

impl ConnectorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Observable link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// `will_retry` is false once the connector has stopped for good
    Disconnected { will_retry: bool },
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector is closed")]
    Closed,

    #[error("invalid hub url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// What the writer task is carrying
#[derive(Debug)]
enum Outbound {
    /// Caller message; requeued if the link dies before it is written
    App(Pending),
    /// Heartbeat, resubscription and snapshot requests; never requeued
    Control(ClientMessage),
}

impl Outbound {
    fn message(&self) -> &ClientMessage {
        match self {
            Outbound::App(pending) => &pending.message,
            Outbound::Control(message) => message,
        }
    }
}

#[derive(Debug)]
struct Link {
    live: Option<mpsc::UnboundedSender<Outbound>>,
    outbox: Outbox,
    closed: bool,
}

struct Shared {
    config: ConnectorConfig,
    link: Mutex<Link>,
    subscriptions: Mutex<BTreeSet<HookEventType>>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?state, "connector state");
        }
    }

    /// Hand a control message to the live link, if there is one
    fn send_control(&self, message: ClientMessage) {
        let link = self.link.lock();
        if let Some(live) = &link.live {
            let _ = live.send(Outbound::Control(message));
        }
    }
}

enum LinkOutcome {
    Cancelled,
    Retry,
    /// Server closed with a code that forbids reconnecting
    Terminal(u16),
}

/// Client side of the realtime protocol with automatic reconnection
pub struct Connector {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    /// Build a connector; server messages arrive on the returned receiver.
    ///
    /// Nothing happens on the network until [`connect`](Self::connect).
    pub fn new(config: ConnectorConfig) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected { will_retry: false });
        let outbox = Outbox::new(config.outbox_capacity, config.max_message_retries);
        let shared = Arc::new(Shared {
            config,
            link: Mutex::new(Link {
                live: None,
                outbox,
                closed: false,
            }),
            subscriptions: Mutex::new(BTreeSet::new()),
            state,
            inbound,
        });
        let connector = Self {
            shared,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        };
        (connector, rx)
    }

    /// Start the connection driver unless it is already running
    pub fn connect(&self) -> Result<(), ConnectorError> {
        if self.shared.link.lock().closed {
            return Err(ConnectorError::Closed);
        }
        let url = &self.shared.config.url;
        url.as_str()
            .into_client_request()
            .map_err(|e| ConnectorError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let mut driver = self.driver.lock();
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        self.shared.set_state(ConnectionState::Connecting);
        *driver = Some(tokio::spawn(run_driver(
            Arc::clone(&self.shared),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Send now if the link is open, otherwise queue for the next link
    pub fn send(&self, message: ClientMessage) -> Result<(), ConnectorError> {
        let mut link = self.shared.link.lock();
        if link.closed {
            return Err(ConnectorError::Closed);
        }
        let pending = Pending::new(message);
        let pending = match &link.live {
            Some(live) => match live.send(Outbound::App(pending)) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(Outbound::App(pending))) => pending,
                Err(mpsc::error::SendError(Outbound::Control(_))) => return Ok(()),
            },
            None => pending,
        };
        link.live = None;
        link.outbox.push(pending);
        Ok(())
    }

    /// Receive pushes of these event types; remembered across reconnects
    pub fn subscribe(&self, event_types: impl IntoIterator<Item = HookEventType>) {
        let added: Vec<_> = event_types.into_iter().collect();
        self.shared.subscriptions.lock().extend(added.iter().copied());
        self.shared.send_control(ClientMessage::subscribe(added));
    }

    /// Stop receiving these event types
    pub fn unsubscribe(&self, event_types: impl IntoIterator<Item = HookEventType>) {
        let removed: Vec<_> = event_types.into_iter().collect();
        let now_empty = {
            let mut subs = self.shared.subscriptions.lock();
            for event_type in &removed {
                subs.remove(event_type);
            }
            subs.is_empty()
        };
        if now_empty {
            // an empty set means "everything" on the hub
            self.shared
                .send_control(ClientMessage::subscribe(Vec::<HookEventType>::new()));
        } else {
            self.shared.send_control(ClientMessage::unsubscribe(removed));
        }
    }

    pub fn subscriptions(&self) -> Vec<HookEventType> {
        self.shared.subscriptions.lock().iter().copied().collect()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Messages waiting for a link
    pub fn queued(&self) -> usize {
        self.shared.link.lock().outbox.len()
    }

    /// Stop reconnecting, close the link and wait for every task to end
    pub async fn close(&self) {
        {
            let mut link = self.shared.link.lock();
            link.closed = true;
            link.live = None;
        }
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "connector driver failed");
            }
        }
        self.shared
            .set_state(ConnectionState::Disconnected { will_retry: false });
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect, run the link, back off, repeat
async fn run_driver(shared: Arc<Shared>, cancel: CancellationToken) {
    let config = &shared.config;
    let mut backoff = Backoff::new(
        config.backoff_floor,
        config.backoff_ceiling,
        config.backoff_factor,
        config.max_attempts,
    );

    loop {
        shared.set_state(ConnectionState::Connecting);
        let attempt = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(config.url.as_str()),
        );
        let outcome = tokio::select! {
            () = cancel.cancelled() => LinkOutcome::Cancelled,
            result = attempt => match result {
                Ok(Ok((ws, _response))) => {
                    backoff.reset();
                    info!(url = %config.url, "connected to hub");
                    run_link(&shared, ws, &cancel).await
                }
                Ok(Err(e)) => {
                    warn!(url = %config.url, error = %e, "connect failed");
                    LinkOutcome::Retry
                }
                Err(_) => {
                    warn!(url = %config.url, "connect timed out");
                    LinkOutcome::Retry
                }
            }
        };

        match outcome {
            LinkOutcome::Cancelled => break,
            LinkOutcome::Terminal(code) => {
                info!(code, "hub closed the connection, not reconnecting");
                break;
            }
            LinkOutcome::Retry => {}
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(attempts = backoff.attempts(), "giving up on hub connection");
            break;
        };
        shared.set_state(ConnectionState::Disconnected { will_retry: true });
        debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempts(), "reconnecting");
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    shared.link.lock().live = None;
    shared.set_state(ConnectionState::Disconnected { will_retry: false });
}

/// Resolves at `deadline`, or never when there is none
async fn pong_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Serve one open link until it fails, is closed, or the connector is closed
async fn run_link(shared: &Shared, ws: WsStream, cancel: &CancellationToken) -> LinkOutcome {
    let config = &shared.config;
    let (sink, mut stream) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let link_cancel = cancel.child_token();
    let writer = tokio::spawn(write_loop(sink, rx, link_cancel.clone(), cancel.clone()));

    // Resubscribe, flush, request a snapshot; in that order and before any
    // new caller message can reach the link.
    {
        let mut link = shared.link.lock();
        let subs: Vec<_> = shared.subscriptions.lock().iter().copied().collect();
        let _ = tx.send(Outbound::Control(ClientMessage::subscribe(subs)));
        let pending = link.outbox.drain_deliverable();
        debug!(flushed = pending.len(), "flushing outbox");
        for item in pending {
            let _ = tx.send(Outbound::App(item));
        }
        let _ = tx.send(Outbound::Control(ClientMessage::Snapshot));
        link.live = Some(tx.clone());
    }
    shared.set_state(ConnectionState::Open);

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let mut awaiting_pong: Option<Instant> = None;

    let outcome = loop {
        tokio::select! {
            () = cancel.cancelled() => break LinkOutcome::Cancelled,
            _ = heartbeat.tick() => {
                if awaiting_pong.is_none() {
                    if tx.send(Outbound::Control(ClientMessage::Ping)).is_err() {
                        break LinkOutcome::Retry;
                    }
                    awaiting_pong = Some(Instant::now() + config.heartbeat_timeout);
                }
            }
            () = pong_deadline(awaiting_pong) => {
                warn!("heartbeat timed out");
                break LinkOutcome::Retry;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Pong) => awaiting_pong = None,
                    Ok(message) => {
                        let _ = shared.inbound.send(message);
                    }
                    Err(e) => debug!(error = %e, "ignoring unrecognized server message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    debug!(?code, "hub sent close");
                    match code {
                        Some(code @ (1000 | 1008)) => break LinkOutcome::Terminal(code),
                        _ => break LinkOutcome::Retry,
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "link read failed");
                    break LinkOutcome::Retry;
                }
                None => break LinkOutcome::Retry,
            }
        }
    };

    shared.link.lock().live = None;
    link_cancel.cancel();
    drop(tx);
    let undelivered = match writer.await {
        Ok(undelivered) => undelivered,
        Err(e) => {
            warn!(error = %e, "link writer failed");
            Vec::new()
        }
    };
    if !undelivered.is_empty() {
        debug!(count = undelivered.len(), "requeueing undelivered messages");
        shared.link.lock().outbox.requeue_front(undelivered);
    }
    if !matches!(outcome, LinkOutcome::Cancelled) {
        shared.set_state(ConnectionState::Disconnected { will_retry: true });
    }
    outcome
}

/// Write queued frames until the link is cancelled or fails.
///
/// Returns caller messages that were not written, including one interrupted
/// mid-send.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    closing: CancellationToken,
) -> Vec<Pending> {
    let mut undelivered = Vec::new();
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let text = match item.message().to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode client message");
                continue;
            }
        };
        let written = tokio::select! {
            () = cancel.cancelled() => None,
            result = sink.send(Message::Text(text)) => Some(result),
        };
        match written {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                debug!(error = %e, "link write failed");
                if let Outbound::App(pending) = item {
                    undelivered.push(pending);
                }
                break;
            }
            None => {
                if let Outbound::App(pending) = item {
                    undelivered.push(pending);
                }
                break;
            }
        }
    }

    rx.close();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::App(pending) = item {
            undelivered.push(pending);
        }
    }

    if closing.is_cancelled() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closed".into(),
        };
        let _ = tokio::time::timeout(
            Duration::from_secs(1),
            sink.send(Message::Close(Some(frame))),
        )
        .await;
    }
    undelivered
}

//! WebSocket connection handler

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::session::{CloseReason, DeliveryError, ObserverSession};
use super::state::AppState;
use crate::protocol::{ClientMessage, ServerMessage};

/// Upper bound on sending the close frame to an unresponsive observer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// `GET /stream` upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one observer connection from handshake to close
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (session, rx) = state.hub.create_session();
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&session)));

    // registered before the snapshot is read, so nothing stored in between
    // is missed; pushes are held until the session opens
    state.hub.register(&session);

    let opened = match initial_frame(&state).await {
        Some((frame, newest_id)) => match state.hub.open_session(&session, frame, newest_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = session.id, error = %e, "could not open observer session");
                session.begin_close(match e {
                    DeliveryError::Full => CloseReason::Backpressure,
                    _ => CloseReason::ServerError,
                });
                false
            }
        },
        None => {
            session.begin_close(CloseReason::ServerError);
            false
        }
    };

    if opened {
        read_loop(stream, &state, &session).await;
    }

    state.hub.remove(session.id);
    session.begin_close(CloseReason::ClientClosed);
    if let Err(e) = writer.await {
        warn!(session_id = session.id, error = %e, "writer task failed");
    }
    session.mark_closed();
    debug!(
        session_id = session.id,
        reason = ?session.close_reason(),
        dropped = session.dropped_count(),
        age_ms = u64::try_from(session.age().as_millis()).unwrap_or(u64::MAX),
        "observer session closed"
    );
}

/// Serialized `initial` frame and the snapshot's newest event id, or `None`
/// if the snapshot could not be built
async fn initial_frame(state: &AppState) -> Option<(Arc<String>, i64)> {
    let snapshot = match state.service.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "snapshot failed");
            return None;
        }
    };
    let newest_id = snapshot.newest_id();
    match ServerMessage::Initial(snapshot).to_json() {
        Ok(json) => Some((Arc::new(json), newest_id)),
        Err(e) => {
            warn!(error = %e, "failed to serialize snapshot");
            None
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    session: &Arc<ObserverSession>,
) {
    loop {
        tokio::select! {
            () = session.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_text(state, session, &text).await {
                        send_reply(session, &reply);
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    send_reply(session, &ServerMessage::error("binary frames are not supported"));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(session_id = session.id, error = %e, "socket read failed");
                    break;
                }
            }
        }
    }
}

/// Answer one client frame; `None` when no reply is due
async fn handle_client_text(
    state: &AppState,
    session: &ObserverSession,
    text: &str,
) -> Option<ServerMessage> {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(session_id = session.id, error = %e, "rejected client frame");
            return Some(ServerMessage::error(e.to_string()));
        }
    };

    match message {
        ClientMessage::Ping => Some(ServerMessage::Pong),
        ClientMessage::Filter(filter) => Some(match state.service.query(filter).await {
            Ok(page) => ServerMessage::Filter(page.events),
            Err(e) => ServerMessage::error(e.to_string()),
        }),
        ClientMessage::Subscribe(sub) => {
            session.subscribe(sub.event_types);
            None
        }
        ClientMessage::Unsubscribe(sub) => {
            session.unsubscribe(sub.event_types);
            None
        }
        ClientMessage::Snapshot => Some(match state.service.snapshot().await {
            Ok(snapshot) => ServerMessage::Initial(snapshot),
            Err(e) => ServerMessage::error(e.to_string()),
        }),
    }
}

fn send_reply(session: &ObserverSession, reply: &ServerMessage) {
    let json = match reply.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize reply");
            return;
        }
    };
    if let Err(DeliveryError::Full) = session.enqueue(Arc::new(json)) {
        warn!(session_id = session.id, "reply dropped, send buffer full");
        session.begin_close(CloseReason::Backpressure);
    }
}

/// Drain the session's queue into the socket, then send a close frame
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    session: Arc<ObserverSession>,
) {
    loop {
        tokio::select! {
            biased;
            () = session.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(text) => {
                    // a stalled socket must not keep the session from closing
                    let sent = tokio::select! {
                        () = session.cancelled() => break,
                        result = sink.send(Message::Text(text.as_str().to_owned())) => result,
                    };
                    if let Err(e) = sent {
                        debug!(session_id = session.id, error = %e, "socket write failed");
                        session.begin_close(CloseReason::ClientClosed);
                        return;
                    }
                }
                None => break,
            }
        }
    }

    let reason = session.close_reason().unwrap_or(CloseReason::ClientClosed);
    let close = Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: reason.as_str().into(),
    }));
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        sink.send(close).await?;
        sink.close().await
    })
    .await;
}

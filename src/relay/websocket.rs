use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::auth::AuthError;
use crate::relay::lifecycle::{Connection, ConnectionState, LifecycleController};
use crate::relay::types::{ClientEvent, ServerEvent};

/// How long the writer gets to flush after the reader is done
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state for WebSocket handling
#[derive(Clone)]
pub struct RelayState {
    pub controller: LifecycleController,
    /// Interval between server-initiated pings
    pub ping_interval: Duration,
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (sink, receiver) = socket.split();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let mut writer = tokio::spawn(write_loop(sink, events_rx, control_rx, state.ping_interval));

    let controller = &state.controller;
    let mut conn = controller.connect(events_tx);
    info!(connection_id = %conn.id(), "New WebSocket connection established");

    read_loop(controller, &mut conn, receiver, &control_tx).await;

    controller.disconnect(&mut conn).await;
    let connection_id = conn.id();
    drop(conn);
    drop(control_tx);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(connection_id = %connection_id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    info!(connection_id = %connection_id, "WebSocket connection terminated");
}

/// Feed inbound frames to the controller until the client goes away or the
/// auth deadline passes while still Pending.
///
/// Pongs and the closing frame go out through `control`.
async fn read_loop<S, E>(
    controller: &LifecycleController,
    conn: &mut Connection,
    mut frames: S,
    control: &UnboundedSender<Message>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let auth_deadline = async {
        match controller.auth_timeout() {
            Some(limit) => tokio::time::sleep_until(Instant::now() + limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            frame = frames.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(connection_id = %conn.id(), "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let event: ClientEvent = match serde_json::from_str(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                debug!(connection_id = %conn.id(), "Failed to parse message: {}", e);
                                conn.send(ServerEvent::OperationError {
                                    code: "PARSE_ERROR".to_string(),
                                    reason: format!("Invalid message format: {}", e),
                                });
                                continue;
                            }
                        };
                        controller.handle_event(conn, event).await;
                    }
                    Message::Ping(data) => {
                        if control.send(Message::Pong(data)).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!(connection_id = %conn.id(), "WebSocket connection closed by client");
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut auth_deadline, if conn.state() == ConnectionState::Pending => {
                warn!(connection_id = %conn.id(), "Closing connection that never authenticated");
                conn.send(ServerEvent::AuthError {
                    reason: AuthError::Timeout.to_string(),
                });
                let _ = control.send(Message::Close(None));
                break;
            }
        }
    }
}

/// Drain a connection's outbound events into the socket, in order, and keep
/// it alive with periodic pings
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: UnboundedReceiver<ServerEvent>,
    mut control: UnboundedReceiver<Message>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval.max(Duration::from_secs(1)));
    // First tick completes immediately
    ping.tick().await;

    loop {
        let frame = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        error!("Failed to serialize event: {}", e);
                        continue;
                    }
                },
                None => break,
            },
            msg = control.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        let closing = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            debug!("Failed to send frame: {}", e);
            break;
        }
        if closing {
            break;
        }
    }

    let _ = sink.close().await;
}

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol::{self, Session};
use crate::ws::{ConnectionHandle, Outbound, ServerEvent};

/// How long a closing connection waits for queued frames to flush.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, serializes queued frames onto it
/// - Ping task: sends periodic pings and closes the socket on a missed pong
/// - Reader loop: decodes incoming frames and dispatches them in arrival order
///
/// The connection becomes the user's live channel once the client announces
/// presence; the session's registration guard releases it when this returns.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();

    let handle = ConnectionHandle::new(user_id.clone(), tx.clone());
    let connection_id = handle.id();

    tracing::info!(
        user_id = %user_id,
        connection_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards queued frames to the WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_interval = state.ping_interval;
    let pong_timeout = state.pong_timeout;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx
                .send(Outbound::Ping(Bytes::from_static(&[1, 2, 3, 4])))
                .is_err()
            {
                // Writer task has died, connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed: close with 1001 (going away)
                    tracing::warn!(connection_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Outbound::Close {
                        code: 1001,
                        reason: "Pong timeout".to_string(),
                    });
                    break;
                }
            }
        }
    });

    // Not registered yet; announce-presence on this session does that
    let mut session = Session::new(state, handle);

    // Reader loop: process incoming WebSocket messages
    loop {
        let incoming = tokio::select! {
            incoming = ws_receiver.next() => incoming,
            // Writer stopped: we closed the socket (superseded or pong timeout)
            _ = tx.closed() => break,
        };

        match incoming {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    // Decode JSON event and dispatch
                    protocol::handle_text_message(text.as_str(), &mut session).await;
                }
                Message::Binary(_) => {
                    // JSON only; reply with an error and keep the connection
                    tracing::debug!(user_id = %user_id, "Received binary frame (expected JSON text)");
                    let _ = tx.send(Outbound::Event(ServerEvent::Error {
                        request_id: None,
                        code: 400,
                        message: "Binary frames are not supported".to_string(),
                    }));
                }
                Message::Pong(_) => {
                    // Pong received, notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Outbound::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended: client disconnected without a close frame
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Unregisters before the writer goes away, so no push targets a dead queue
    drop(session);

    // Cleanup: stop the ping task
    ping_handle.abort();
    // Let a queued close frame flush; otherwise stop the writer
    drop(tx);
    if timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        tracing::debug!(connection_id, "Writer did not finish in time");
        writer_handle.abort();
    }

    tracing::info!(
        user_id = %user_id,
        connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives frames from the queue and forwards them to the WebSocket sink.
/// Stops after sending a close frame or when the sink breaks.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = rx.recv().await {
        let (msg, closing) = match frame {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            },
            Outbound::Ping(data) => (Message::Ping(data), false),
            Outbound::Pong(data) => (Message::Pong(data), false),
            // Closing frame is the last thing written
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

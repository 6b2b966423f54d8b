//! WebSocket relay endpoint: the per-connection control loop.
//!
//! One receive loop per accepted connection demultiplexes structured
//! control frames (`start`/`stop`/`text`) from raw binary audio and
//! dispatches them to the connection's session. All outbound traffic —
//! control replies and engine audio alike — funnels through a single
//! send task that owns the WebSocket sink, so nothing else ever writes
//! to the socket.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use solace_relay::OutboundFrame;
use solace_types::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bound on outbound frames buffered per connection. Beyond this the
/// client is too slow and engine audio is dropped at the bridge.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// WebSocket handler: `GET /ws/conversation`.
pub async fn relay_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends a control reply through the connection's outbound channel.
/// Returns `false` when the connection is gone.
async fn send_control(tx: &mpsc::Sender<OutboundFrame>, message: ServerMessage) -> bool {
    if tx.send(OutboundFrame::new(message)).await.is_err() {
        tracing::debug!("outbound channel closed while sending control reply");
        return false;
    }
    true
}

/// Handles the WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("new relay connection established");
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);

    // Single writer for the sink. Acknowledgements fire only after the
    // frame actually reached the socket, which is what the bridge's
    // bounded delivery wait measures.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame.message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sender.send(AxumMessage::Text(json.into())).await.is_err() {
                break;
            }
            if let Some(ack) = frame.ack {
                let _ = ack.send(());
            }
        }
    });

    let session_id = state
        .registry
        .create(tx.clone(), None)
        .await
        .id()
        .to_string();

    send_control(
        &tx,
        ServerMessage::SessionCreated {
            session_id: session_id.clone(),
            message: "Conversation session created. Send 'start' to begin.".to_string(),
        },
    )
    .await;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            AxumMessage::Text(text) => {
                handle_control_frame(&state, &session_id, text.as_str(), &tx).await;
            }
            AxumMessage::Binary(data) => {
                if let Some(session) = state.registry.get(&session_id).await {
                    tracing::debug!(
                        session_id = %session_id,
                        bytes = data.len(),
                        "received audio frame from client"
                    );
                    session.bridge().enqueue_inbound(data.to_vec());
                } else {
                    tracing::debug!(
                        session_id = %session_id,
                        "discarding audio frame for ended session"
                    );
                }
            }
            AxumMessage::Close(_) => break,
            // Ping/pong frames are answered by axum itself.
            _ => {}
        }
    }

    // Unconditional cleanup: no session outlives its connection, whatever
    // path brought the loop down.
    state.registry.end(&session_id).await;
    send_task.abort();
    tracing::info!(session_id = %session_id, "relay connection closed");
}

/// Decodes and dispatches one structured control frame.
async fn handle_control_frame(
    state: &Arc<AppState>,
    session_id: &str,
    text: &str,
    tx: &mpsc::Sender<OutboundFrame>,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(_) => {
            send_control(
                tx,
                ServerMessage::Error {
                    message: describe_bad_frame(text),
                },
            )
            .await;
            return;
        }
    };

    match message {
        ClientMessage::Start { user_id } => {
            match state.registry.start(session_id, user_id).await {
                Ok(()) => {
                    send_control(
                        tx,
                        ServerMessage::ConversationStarted {
                            message: "Conversation started! You can now speak.".to_string(),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "failed to start conversation: {}", e);
                    send_control(
                        tx,
                        ServerMessage::Error {
                            message: format!("Failed to start conversation: {e}"),
                        },
                    )
                    .await;
                }
            }
        }
        ClientMessage::Stop => {
            state.registry.end(session_id).await;
            send_control(
                tx,
                ServerMessage::ConversationStopped {
                    message: "Conversation stopped.".to_string(),
                },
            )
            .await;
        }
        ClientMessage::Text { text } => {
            tracing::info!(session_id = %session_id, "received text input: {}", text);
            send_control(
                tx,
                ServerMessage::TextResponse {
                    text: format!("Echo: {text}"),
                },
            )
            .await;
        }
    }
}

/// Names the offending `type` for recognizable-but-unknown control frames;
/// everything else is reported as malformed.
fn describe_bad_frame(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match value.get("type").and_then(|t| t.as_str()) {
            Some(kind @ ("start" | "stop" | "text")) => {
                format!("invalid payload for message type: {kind}")
            }
            Some(kind) => format!("Unknown message type: {kind}"),
            None => "invalid message format: missing type".to_string(),
        },
        Err(_) => "invalid message format".to_string(),
    }
}

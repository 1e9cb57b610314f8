//! The browser push channel.
//!
//! Each connection gets a fresh [`ClientId`], announced in a `connected`
//! message; the client echoes it in trigger requests so results can be
//! routed back here. The channel is push-only apart from heartbeats.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use nodebridge_shared::{ClientId, ClientMessage, ServerMessage};

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = ClientId::new();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);
    state.connections.register(client_id, tx).await;
    tracing::info!(client_id = %client_id, "Browser client connected");

    let (mut sink, mut stream) = socket.split();

    let greeting = ServerMessage::Connected {
        client_id: *client_id.as_uuid(),
    };
    if send_json(&mut sink, &greeting).await.is_err() {
        state.connections.unregister(client_id).await;
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if send_json(&mut sink, &message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    // Heartbeats only keep the connection alive.
                    Ok(ClientMessage::Heartbeat) => {}
                    Err(e) => {
                        tracing::debug!(
                            client_id = %client_id,
                            error = %e,
                            "Ignoring unparseable client frame"
                        );
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(client_id = %client_id, error = %e, "Client socket error");
                    break;
                }
            }
        }
    });

    // Either half closing tears the connection down.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.connections.unregister(client_id).await;
    // Disconnect abandons the client's in-flight work; results for it are
    // dropped from here on, never re-queued.
    state.correlator.client_disconnected(client_id);
    tracing::info!(client_id = %client_id, "Browser client disconnected");
}

async fn send_json(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

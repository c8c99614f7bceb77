//! Websocket feed of variable updates

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::AppState;
use crate::registry::VariableUpdate;

pub async fn updates(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let rx = state.service.subscribe();
    ws.on_upgrade(move |socket| stream_updates(socket, rx))
}

/// Forward every update as a JSON text frame until either side goes away
async fn stream_updates(socket: WebSocket, mut rx: broadcast::Receiver<VariableUpdate>) {
    let (mut sink, mut stream) = socket.split();
    debug!("Websocket client connected");

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(update) => {
                    let text = match serde_json::to_string(&update) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize update: {}", e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Websocket client lagged, missed {} updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Websocket client disconnected");
}

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use jukebox::Notification;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let receiver = state.notifier.subscribe();
    ws.on_upgrade(move |socket| stream_notifications(socket, receiver))
}

/// Forwards notifications as JSON text frames until either side closes.
async fn stream_notifications(socket: WebSocket, mut receiver: broadcast::Receiver<Notification>) {
    let (mut sender, mut incoming) = socket.split();
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!("encoding notification failed: {}", err);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("events client missed {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("events client disconnected");
}

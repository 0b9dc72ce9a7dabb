//! WebSocket adapter over the session gateway.
//!
//! One task pumps outbound events from the session's channel onto the
//! socket; the connection loop below decodes inbound frames into client
//! events. Dropping the outbound sender on disconnect ends the pump.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AppState;
use crate::models::Session;
use crate::protocol::{ClientEvent, ServerEvent};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!("failed to encode server event: {}", err);
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new();
    debug!("connection {} accepted", session.id);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => {
                    if let Err(err) = state.service.handle(&mut session, &tx, event).await {
                        let _ = tx.send(ServerEvent::Error {
                            message: err.to_string(),
                        });
                    }
                }
                Err(err) => {
                    let _ = tx.send(ServerEvent::Error {
                        message: format!("unrecognized event: {}", err),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum; binary frames are not part of the
            // protocol.
            Ok(_) => {}
            Err(err) => {
                debug!("connection {} transport error: {}", session.id, err);
                break;
            }
        }
    }

    // Implicit leave: clears any typing entry and announces the departure.
    state.service.leave(&mut session).await;
    debug!("connection {} closed", session.id);

    drop(tx);
    let _ = writer.await;
}

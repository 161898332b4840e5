//! WebSocket transport between the hub and one client.

use std::path::PathBuf;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use super::AppState;
use crate::hub::{Handshake, Hub, HubError};
use crate::protocol::{
    CLOSE_TOO_MANY_CONNECTIONS, CLOSE_TOO_MANY_CONNECTIONS_REASON, ClientMessage,
};

#[derive(Debug, Deserialize)]
pub(super) struct WsParams {
    root: PathBuf,
}

pub(super) async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, params.root))
}

async fn handle_socket(mut socket: WebSocket, hub: Hub, root: PathBuf) {
    let mut connection = match hub.accept(Handshake { root }) {
        Ok(connection) => connection,
        Err(e) => {
            let frame = match &e {
                HubError::Rejected { .. } => CloseFrame {
                    code: CLOSE_TOO_MANY_CONNECTIONS,
                    reason: CLOSE_TOO_MANY_CONNECTIONS_REASON.into(),
                },
                other => {
                    tracing::warn!("[ws] refusing connection: {other}");
                    CloseFrame {
                        code: close_code::POLICY,
                        reason: other.to_string().into(),
                    }
                }
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let id = connection.id();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outbound = connection.recv() => {
                let Some(message) = outbound else {
                    // The hub dropped us for falling behind
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AGAIN,
                            reason: "send queue overflow".into(),
                        })))
                        .await;
                    break;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("[ws] failed to encode message for {id}: {e}");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Err(e) = hub.handle_client_message(id, message) {
                                tracing::warn!("[ws] {id}: {e}");
                            }
                        }
                        Err(e) => tracing::warn!("[ws] {id} sent an invalid message: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    crate::debug_event!("ws", "receive error", "{id}: {e}");
                    break;
                }
            },
        }
    }

    crate::debug_event!("ws", "closed", "{id} after {:?}", connection.age());
}

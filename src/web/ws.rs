use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game::messages::{
    ClientToServerMessage, ServerToClientMessage, client_message_from_ws_text,
};
use crate::game::session::ConnectIntent;
use crate::game::GameError;
use crate::limiter::EventRateLimiter;
use crate::registry::RoomActorHandle;
use crate::state::AppState;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::info!("WebSocket: Connection attempt to /ws endpoint");
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Sends one message on a not-yet-bound socket and closes it.
async fn reject(
    ws_sender: &mut SplitSink<WebSocket, ws::Message>,
    message: ServerToClientMessage,
) {
    if let Ok(ws_msg) = message.to_ws_text() {
        let _ = ws_sender.send(ws_msg).await;
    }
    let _ = ws_sender.close().await;
}

fn handshake_failure(handshake: &ClientToServerMessage, err: GameError) -> ServerToClientMessage {
    match handshake {
        ClientToServerMessage::Reconnect { .. } => {
            ServerToClientMessage::ReconnectFailed { message: err.to_string() }
        }
        _ => ServerToClientMessage::JoinError { message: err.to_string() },
    }
}

pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The first frame must be a handshake message; it decides which room
    // this socket belongs to and under which identity.
    let handshake = match ws_receiver.next().await {
        Some(Ok(ws::Message::Text(text_msg))) => {
            match client_message_from_ws_text(&text_msg) {
                Ok(msg) if msg.is_handshake() => msg,
                Ok(other_msg) => {
                    tracing::warn!(
                        "WebSocket: Initial message was not a handshake. Received: {:?}. Closing.",
                        other_msg.kind()
                    );
                    reject(
                        &mut ws_sender,
                        ServerToClientMessage::JoinError {
                            message:
                                "First message must be CreateSession, JoinSession or Reconnect"
                                    .to_string(),
                        },
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "WebSocket: Failed to deserialize initial message: {}. Closing.",
                        e
                    );
                    reject(
                        &mut ws_sender,
                        ServerToClientMessage::JoinError {
                            message: format!("Invalid handshake message format: {e}"),
                        },
                    )
                    .await;
                    return;
                }
            }
        }
        Some(Ok(other_type_msg)) => {
            tracing::warn!(
                "WS: Client sent non-text initial message: {:?}. Closing.",
                other_type_msg
            );
            reject(
                &mut ws_sender,
                ServerToClientMessage::JoinError {
                    message: "Handshake must be a text JSON message".to_string(),
                },
            )
            .await;
            return;
        }
        Some(Err(e)) => {
            tracing::warn!("WS: Error receiving initial message: {}. Closing.", e);
            let _ = ws_sender.close().await;
            return;
        }
        None => {
            tracing::info!("WS: Client disconnected before sending handshake. Closing.");
            return;
        }
    };

    let conn_id = Uuid::new_v4();

    let (identity, room_handle, intent) = match &handshake {
        ClientToServerMessage::CreateSession { identity, name } => {
            match app_state
                .rooms
                .create_room(identity.clone(), name.clone())
                .await
            {
                Ok((_details, handle)) => {
                    (identity.clone(), handle, ConnectIntent::Create { identity: identity.clone() })
                }
                Err(err) => {
                    tracing::info!("WS: create-session rejected for {}: {}", conn_id, err);
                    reject(&mut ws_sender, handshake_failure(&handshake, err)).await;
                    return;
                }
            }
        }
        ClientToServerMessage::JoinSession { code, identity, name } => {
            match app_state.rooms.get_room(code).await {
                Some(handle) => (
                    identity.clone(),
                    handle,
                    ConnectIntent::Join { identity: identity.clone(), name: name.clone() },
                ),
                None => {
                    tracing::info!("WS: join rejected, room {} not found", code);
                    reject(&mut ws_sender, handshake_failure(&handshake, GameError::NotFound))
                        .await;
                    return;
                }
            }
        }
        ClientToServerMessage::Reconnect { identity, code, .. } => {
            match app_state.rooms.get_room(code).await {
                Some(handle) => {
                    (identity.clone(), handle, ConnectIntent::Reconnect { identity: identity.clone() })
                }
                None => {
                    tracing::info!("WS: reconnect rejected, room {} not found", code);
                    reject(&mut ws_sender, handshake_failure(&handshake, GameError::NotFound))
                        .await;
                    return;
                }
            }
        }
        // is_handshake() guarantees one of the three arms above matched.
        _ => return,
    };

    let (actor_to_client_tx, mut actor_to_client_rx) = mpsc::channel::<ws::Message>(32);

    if let Err(err) = room_handle
        .connect(conn_id, intent, actor_to_client_tx.clone())
        .await
    {
        tracing::info!(
            "WS: room {} refused connection {}: {}",
            room_handle.code,
            conn_id,
            err
        );
        reject(&mut ws_sender, handshake_failure(&handshake, err)).await;
        return;
    }

    tracing::info!(
        "WebSocket: Connection {} bound to room {} as {}",
        conn_id,
        room_handle.code,
        identity
    );

    let room_code_send = room_handle.code.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = actor_to_client_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::info!(
                    "Connection {} in room {}: WS send error, client likely disconnected.",
                    conn_id,
                    room_code_send
                );
                break;
            }
        }
        tracing::debug!(
            "Connection {} in room {}: send task terminating.",
            conn_id,
            room_code_send
        );
        let _ = ws_sender.close().await;
    });

    let room_handle_recv = room_handle.clone();
    let identity_recv = identity.clone();
    let outbound = actor_to_client_tx;
    let limits = app_state.settings.limits.clone();
    let mut recv_task = tokio::spawn(async move {
        // Counters live and die with this connection.
        let mut limiter = EventRateLimiter::from_config(&limits);
        loop {
            match ws_receiver.next().await {
                Some(Ok(ws::Message::Text(text_msg))) => {
                    let message = match client_message_from_ws_text(&text_msg) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(
                                "Connection {}: undeserializable event: {}",
                                conn_id,
                                e
                            );
                            let error = ServerToClientMessage::GameError {
                                message: format!("Invalid message format: {e}"),
                            };
                            if let Ok(ws_msg) = error.to_ws_text()
                                && outbound.send(ws_msg).await.is_err()
                            {
                                break;
                            }
                            continue;
                        }
                    };

                    if !limiter.check(message.kind()) {
                        tracing::debug!(
                            "Connection {}: rate limited event kind {}",
                            conn_id,
                            message.kind()
                        );
                        let notice = ServerToClientMessage::GameError {
                            message: GameError::RateLimited.to_string(),
                        };
                        if let Ok(ws_msg) = notice.to_ws_text()
                            && outbound.send(ws_msg).await.is_err()
                        {
                            break;
                        }
                        continue;
                    }

                    if room_handle_recv
                        .process_event(conn_id, identity_recv.clone(), message)
                        .await
                        .is_err()
                    {
                        tracing::info!(
                            "Connection {}: room {} has closed, dropping socket",
                            conn_id,
                            room_handle_recv.code
                        );
                        break;
                    }
                }
                Some(Ok(ws::Message::Close(_))) => {
                    tracing::info!("Connection {}: WebSocket closed by client.", conn_id);
                    break;
                }
                Some(Ok(ws::Message::Ping(_) | ws::Message::Pong(_))) => {
                    // Axum answers pings on its own.
                }
                Some(Ok(ws::Message::Binary(_))) => {
                    tracing::debug!("Connection {}: binary message ignored", conn_id);
                }
                Some(Err(e)) => {
                    tracing::warn!("Connection {}: WebSocket error: {}", conn_id, e);
                    break;
                }
                None => {
                    tracing::info!("Connection {}: WebSocket stream ended.", conn_id);
                    break;
                }
            }
        }
    });

    // Wait for either task to complete, then abort the other.
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        },
        _ = (&mut recv_task) => {
            send_task.abort();
        },
    }

    // Tell the room this socket is gone; the engine decides whether that
    // means leaving (lobby) or just unbinding (mid-game).
    room_handle.client_disconnected(conn_id).await;
    tracing::info!(
        "WebSocket: Connection {} fully disconnected from room {}",
        conn_id,
        room_handle.code
    );
}

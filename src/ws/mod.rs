pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::CoordinatorError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use handlers::Connection;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub room_id: String,
    pub participant_id: Option<String>,
    /// Resume point; events after this sequence are replayed
    pub since: Option<u64>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::info!(
        room_id = %params.room_id,
        participant_id = ?params.participant_id,
        since = ?params.since,
        "WebSocket connection request"
    );

    // Reject unknown rooms before upgrading
    match state.get_room(&params.room_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return CoordinatorError::NotFound("Room not found".to_string()).into_response(),
        Err(e) => return e.into_response(),
    }

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn send(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server message");
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let participant_id = params
        .participant_id
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| ulid::Ulid::new().to_string());

    let setup = async {
        let room = state
            .get_room(&params.room_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Room not found".to_string()))?;
        let (subscription, view) = state.open_room_view(&room.id, params.since).await?;
        let presence = state.subscribe_to_presence(&room.id, &participant_id).await?;
        Ok::<_, CoordinatorError>((room, subscription, view, presence))
    };

    let (room, mut subscription, view, presence) = match setup.await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(room_id = %params.room_id, error = %e, "WebSocket setup failed");
            let _ = send(&mut sender, &ServerMessage::from(e)).await;
            return;
        }
    };

    let mut counts = presence.counts();
    let mut conn = Connection::new(room.id.clone(), view, presence);

    let welcome = ServerMessage::Welcome {
        room: room.clone(),
        stats: conn.view.stats(),
        last_seq: subscription.last_seq(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }
    let initial = *counts.borrow_and_update();
    if !send(&mut sender, &ServerMessage::Presence { count: initial }).await {
        return;
    }

    tracing::info!(room_id = %room.id, participant_id = %participant_id, "WebSocket connected");

    let mut refresh = tokio::time::interval(state.config.stats_refresh);
    // The first tick fires immediately; the welcome already carries fresh stats
    refresh.tick().await;

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                if let Some(msg) = conn.on_event(event) {
                    if !send(&mut sender, &msg).await {
                        break;
                    }
                }
            }

            changed = counts.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *counts.borrow_and_update();
                if !send(&mut sender, &ServerMessage::Presence { count }).await {
                    break;
                }
            }

            _ = refresh.tick() => {
                let msg = conn.refresh(&state).await;
                if !send(&mut sender, &msg).await {
                    break;
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(room_id = %room.id, "Received message: {}", text);
                        // Any traffic counts as liveness
                        conn.presence.heartbeat();

                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handlers::handle_message(client_msg, &mut conn, &state).await,
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to parse client message");
                                vec![ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                )]
                            }
                        };
                        let mut ok = true;
                        for reply in &replies {
                            if !send(&mut sender, reply).await {
                                ok = false;
                                break;
                            }
                        }
                        if !ok {
                            tracing::error!("Failed to send response");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        conn.presence.heartbeat();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(
        room_id = %room.id,
        participant_id = %participant_id,
        last_seq = subscription.last_seq(),
        "WebSocket connection closed"
    );
}

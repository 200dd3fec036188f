use crate::observer::RoomView;
use crate::presence::PresenceHandle;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, ClaimOutcome};
use crate::types::*;

/// Per-connection state: which room it follows, its own deduped tally and
/// its presence registration
pub struct Connection {
    pub room_id: RoomId,
    pub view: RoomView,
    pub presence: PresenceHandle,
}

impl Connection {
    pub fn new(room_id: RoomId, view: RoomView, presence: PresenceHandle) -> Self {
        Self {
            room_id,
            view,
            presence,
        }
    }

    /// Run a change event through dedup and the tally. Duplicates yield nothing.
    pub fn on_event(&mut self, event: CodeEvent) -> Option<ServerMessage> {
        if !self.view.observe(&event) {
            tracing::trace!(key = %event.key, seq = event.seq, "Dropping duplicate event");
            return None;
        }
        Some(ServerMessage::CodeChanged {
            stats: self.view.stats(),
            event,
        })
    }

    /// Reset the tally from a fresh scan
    pub async fn refresh(&mut self, state: &AppState) -> ServerMessage {
        match state.room_snapshot(&self.room_id).await {
            Ok(codes) => {
                self.view.merge_snapshot(&codes);
                ServerMessage::Stats {
                    stats: self.view.stats(),
                }
            }
            Err(e) => {
                tracing::warn!(room_id = %self.room_id, error = %e, "Stats refresh failed");
                e.into()
            }
        }
    }
}

/// Handle one client message. May produce several outgoing messages.
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &AppState,
) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::ClaimNext { requester_id } => {
            match state.claim_next(&conn.room_id, requester_id.as_deref()).await {
                Ok(ClaimOutcome::Claimed(code)) => vec![ServerMessage::Claimed { code }],
                Ok(ClaimOutcome::Exhausted) => vec![ServerMessage::Exhausted],
                Err(e) => vec![e.into()],
            }
        }

        ClientMessage::SetStatus { code_id, status } => {
            match state.set_code_status(&code_id, &status).await {
                Ok(code) => vec![ServerMessage::Updated { code }],
                Err(e) => vec![e.into()],
            }
        }

        ClientMessage::Resume { last_seq } => state
            .notifier
            .replay(&conn.room_id, last_seq)
            .await
            .into_iter()
            .filter_map(|event| conn.on_event(event))
            .collect(),

        ClientMessage::Heartbeat => {
            conn.presence.heartbeat();
            Vec::new()
        }

        ClientMessage::RefreshStats => vec![conn.refresh(state).await],
    }
}

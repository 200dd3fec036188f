use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the next code to test
    ClaimNext {
        requester_id: Option<RequesterId>,
    },
    SetStatus {
        code_id: CodeId,
        status: String,
    },
    /// Re-deliver buffered events after `last_seq`
    Resume {
        last_seq: u64,
    },
    Heartbeat,
    /// Recompute stats from a full scan now
    RefreshStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        room: Room,
        stats: RoomStats,
        /// Sequence of the newest event this connection already accounts for
        last_seq: u64,
        server_now: String,
    },
    /// A code changed; `stats` is the connection's tally after applying it
    CodeChanged {
        event: CodeEvent,
        stats: RoomStats,
    },
    Stats {
        stats: RoomStats,
    },
    Presence {
        count: usize,
    },
    Claimed {
        code: Code,
    },
    /// No pending codes remain
    Exhausted,
    Updated {
        code: Code,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            msg: msg.into(),
        }
    }
}

impl From<crate::error::CoordinatorError> for ServerMessage {
    fn from(err: crate::error::CoordinatorError) -> Self {
        ServerMessage::error(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"t":"set_status","code_id":"c1","status":"failed"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SetStatus {
                code_id: "c1".to_string(),
                status: "failed".to_string(),
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"t":"claim_next"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ClaimNext { requester_id: None });
    }

    #[test]
    fn test_server_message_tags() {
        let json = serde_json::to_value(ServerMessage::Exhausted).unwrap();
        assert_eq!(json["t"], "exhausted");

        let json = serde_json::to_value(ServerMessage::Presence { count: 3 }).unwrap();
        assert_eq!(json["t"], "presence");
        assert_eq!(json["count"], 3);

        let err = crate::error::CoordinatorError::NotFound("Code not found".to_string());
        let json = serde_json::to_value(ServerMessage::from(err)).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
    }
}

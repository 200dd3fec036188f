use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque ID types for type safety
pub type RoomId = String;
pub type CodeId = String;
pub type RequesterId = String;
pub type ParticipantId = String;

/// Lifecycle state of a single code in a room's pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Pending,
    Testing,
    Success,
    Failed,
}

impl CodeStatus {
    pub const ALL: [CodeStatus; 4] = [
        CodeStatus::Pending,
        CodeStatus::Testing,
        CodeStatus::Success,
        CodeStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Pending => "pending",
            CodeStatus::Testing => "testing",
            CodeStatus::Success => "success",
            CodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not one of the four known statuses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}' (expected pending, testing, success or failed)")]
pub struct UnknownStatus(pub String);

impl FromStr for CodeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CodeStatus::Pending),
            "testing" => Ok(CodeStatus::Testing),
            "success" => Ok(CodeStatus::Success),
            "failed" => Ok(CodeStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// How a status change relates to the transition graph
/// `pending -> testing -> {success, failed}`, `* -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status is already the requested one
    Unchanged,
    /// pending -> testing, testing -> success/failed
    Forward,
    /// any -> pending
    Undo,
    /// Anything else (e.g. pending -> success). Accepted, but off the graph.
    Skip,
}

impl Transition {
    pub fn classify(from: CodeStatus, to: CodeStatus) -> Self {
        use CodeStatus::*;
        match (from, to) {
            (a, b) if a == b => Transition::Unchanged,
            (_, Pending) => Transition::Undo,
            (Pending, Testing) | (Testing, Success) | (Testing, Failed) => Transition::Forward,
            _ => Transition::Skip,
        }
    }

    /// True for edges that are part of the documented graph
    pub fn is_on_graph(&self) -> bool {
        !matches!(self, Transition::Skip)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Code {
    pub id: CodeId,
    pub room_id: RoomId,
    /// The literal code value, e.g. "1234"
    pub code: String,
    pub status: CodeStatus,
    pub assigned_to: Option<RequesterId>,
    /// Row version, bumped on every write. Used as the optimistic concurrency token.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate status counts for one room. Derived, never authoritative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomStats {
    pub total: u64,
    pub pending: u64,
    pub testing: u64,
    pub failed: u64,
    pub success: u64,
}

impl RoomStats {
    /// Build stats from an iterator of statuses (full scan)
    pub fn from_statuses(statuses: impl IntoIterator<Item = CodeStatus>) -> Self {
        let mut stats = RoomStats::default();
        for status in statuses {
            stats.total += 1;
            *stats.slot_mut(status) += 1;
        }
        stats
    }

    pub fn count(&self, status: CodeStatus) -> u64 {
        match status {
            CodeStatus::Pending => self.pending,
            CodeStatus::Testing => self.testing,
            CodeStatus::Success => self.success,
            CodeStatus::Failed => self.failed,
        }
    }

    fn slot_mut(&mut self, status: CodeStatus) -> &mut u64 {
        match status {
            CodeStatus::Pending => &mut self.pending,
            CodeStatus::Testing => &mut self.testing,
            CodeStatus::Success => &mut self.success,
            CodeStatus::Failed => &mut self.failed,
        }
    }

    pub fn increment(&mut self, status: CodeStatus) {
        *self.slot_mut(status) += 1;
    }

    /// Decrement, clamped at zero
    pub fn decrement(&mut self, status: CodeStatus) {
        let slot = self.slot_mut(status);
        *slot = slot.saturating_sub(1);
    }

    /// pending + testing + failed + success == total
    pub fn is_consistent(&self) -> bool {
        self.pending + self.testing + self.failed + self.success == self.total
    }
}

/// Composite dedup key for change events: (code id, resulting status)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub code_id: CodeId,
    pub status: CodeStatus,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.code_id, self.status)
    }
}

/// A row-level change published for a room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeEvent {
    /// Per-room sequence number assigned by the notifier
    pub seq: u64,
    pub key: EventKey,
    /// Status before the write, as seen by the store
    pub previous_status: CodeStatus,
    /// Full new row state
    pub code: Code,
}

impl CodeEvent {
    pub fn new(seq: u64, previous_status: CodeStatus, code: Code) -> Self {
        Self {
            seq,
            key: EventKey {
                code_id: code.id.clone(),
                status: code.status,
            },
            previous_status,
            code,
        }
    }
}

//! Row store abstraction
//!
//! The coordinator treats persistence as an external collaborator: a
//! transactional table of rooms and codes offering single-row conditional
//! updates and a change feed. `MemoryStore` is the bundled implementation.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::types::*;

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal view of a pending row, as needed by the claim path
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCode {
    pub id: CodeId,
    pub code: String,
    pub version: u64,
}

/// What a conditional write expects to find in the row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub version: u64,
    pub status: CodeStatus,
}

/// New values for a conditional write. `updated_at` and `version` are set by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeWrite {
    pub status: CodeStatus,
    pub assigned_to: Option<RequesterId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The write was committed; holds the new row
    Applied(Code),
    /// Another writer got there first; nothing was written
    Conflict,
}

/// A committed row change, published on the store's feed
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChange {
    pub previous_status: CodeStatus,
    pub code: Code,
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Insert a room, failing with `UniqueViolation` if the name is taken
    async fn insert_room(&self, name: &str) -> StoreResult<Room>;

    async fn room(&self, id: &str) -> StoreResult<Option<Room>>;

    async fn room_by_name(&self, name: &str) -> StoreResult<Option<Room>>;

    async fn set_room_active(&self, id: &str, active: bool) -> StoreResult<Room>;

    /// Bulk insert pending codes. Values already in the pool are skipped.
    /// Returns the number of rows inserted. Does not publish changes.
    async fn insert_codes(&self, room_id: &str, values: &[String]) -> StoreResult<usize>;

    async fn code(&self, id: &str) -> StoreResult<Option<Code>>;

    async fn codes_in_room(&self, room_id: &str) -> StoreResult<Vec<Code>>;

    async fn pending_codes(&self, room_id: &str) -> StoreResult<Vec<PendingCode>>;

    /// Single-row conditional update. Commits only if the row still matches
    /// `expected`; a committed write publishes exactly one `CodeChange`.
    async fn compare_and_set(
        &self,
        code_id: &str,
        expected: Precondition,
        write: CodeWrite,
    ) -> StoreResult<CasOutcome>;

    /// Subscribe to committed row changes across all rooms, in commit order.
    /// The feed never drops a change; a slow reader only buffers.
    fn changes(&self) -> mpsc::UnboundedReceiver<CodeChange>;
}

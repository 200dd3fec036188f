use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, RwLock};

use super::{CasOutcome, CodeChange, CodeStore, CodeWrite, PendingCode, Precondition, StoreResult};
use crate::error::StoreError;
use crate::types::*;

#[derive(Default)]
struct RoomTable {
    rows: HashMap<RoomId, Room>,
    by_name: HashMap<String, RoomId>,
}

#[derive(Default)]
struct CodeTable {
    rows: HashMap<CodeId, Code>,
    by_room: HashMap<RoomId, Vec<CodeId>>,
}

/// In-memory row store
pub struct MemoryStore {
    rooms: RwLock<RoomTable>,
    codes: RwLock<CodeTable>,
    feed: Mutex<Vec<mpsc::UnboundedSender<CodeChange>>>,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(RoomTable::default()),
            codes: RwLock::new(CodeTable::default()),
            feed: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while offline every call fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn publish(&self, change: CodeChange) {
        let mut subscribers = self.feed.lock().unwrap_or_else(|e| e.into_inner());
        // Receivers that were dropped are pruned on the next send
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn insert_room(&self, name: &str) -> StoreResult<Room> {
        self.check_online()?;
        let mut rooms = self.rooms.write().await;
        if rooms.by_name.contains_key(name) {
            return Err(StoreError::UniqueViolation("Room name".to_string()));
        }

        let room = Room {
            id: ulid::Ulid::new().to_string(),
            name: name.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        rooms.by_name.insert(room.name.clone(), room.id.clone());
        rooms.rows.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn room(&self, id: &str) -> StoreResult<Option<Room>> {
        self.check_online()?;
        Ok(self.rooms.read().await.rows.get(id).cloned())
    }

    async fn room_by_name(&self, name: &str) -> StoreResult<Option<Room>> {
        self.check_online()?;
        let rooms = self.rooms.read().await;
        Ok(rooms
            .by_name
            .get(name)
            .and_then(|id| rooms.rows.get(id))
            .cloned())
    }

    async fn set_room_active(&self, id: &str, active: bool) -> StoreResult<Room> {
        self.check_online()?;
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .rows
            .get_mut(id)
            .ok_or_else(|| StoreError::RowNotFound("Room".to_string()))?;
        room.active = active;
        Ok(room.clone())
    }

    async fn insert_codes(&self, room_id: &str, values: &[String]) -> StoreResult<usize> {
        self.check_online()?;
        if !self.rooms.read().await.rows.contains_key(room_id) {
            return Err(StoreError::RowNotFound("Room".to_string()));
        }

        let mut codes = self.codes.write().await;
        let CodeTable { rows, by_room } = &mut *codes;
        let ids = by_room.entry(room_id.to_string()).or_default();
        let mut existing: HashSet<String> = ids
            .iter()
            .filter_map(|id| rows.get(id))
            .map(|c| c.code.clone())
            .collect();

        let now = Utc::now();
        let mut inserted = 0;
        for value in values {
            if !existing.insert(value.clone()) {
                continue;
            }
            let code = Code {
                id: ulid::Ulid::new().to_string(),
                room_id: room_id.to_string(),
                code: value.clone(),
                status: CodeStatus::Pending,
                assigned_to: None,
                version: 1,
                updated_at: now,
                created_at: now,
            };
            ids.push(code.id.clone());
            rows.insert(code.id.clone(), code);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn code(&self, id: &str) -> StoreResult<Option<Code>> {
        self.check_online()?;
        Ok(self.codes.read().await.rows.get(id).cloned())
    }

    async fn codes_in_room(&self, room_id: &str) -> StoreResult<Vec<Code>> {
        self.check_online()?;
        let codes = self.codes.read().await;
        Ok(codes
            .by_room
            .get(room_id)
            .map(|ids| ids.iter().filter_map(|id| codes.rows.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn pending_codes(&self, room_id: &str) -> StoreResult<Vec<PendingCode>> {
        self.check_online()?;
        let codes = self.codes.read().await;
        Ok(codes
            .by_room
            .get(room_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| codes.rows.get(id))
                    .filter(|c| c.status == CodeStatus::Pending)
                    .map(|c| PendingCode {
                        id: c.id.clone(),
                        code: c.code.clone(),
                        version: c.version,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn compare_and_set(
        &self,
        code_id: &str,
        expected: Precondition,
        write: CodeWrite,
    ) -> StoreResult<CasOutcome> {
        self.check_online()?;
        let mut codes = self.codes.write().await;
        let row = codes
            .rows
            .get_mut(code_id)
            .ok_or_else(|| StoreError::RowNotFound("Code".to_string()))?;

        if row.version != expected.version || row.status != expected.status {
            return Ok(CasOutcome::Conflict);
        }

        let previous_status = row.status;
        row.status = write.status;
        row.assigned_to = write.assigned_to;
        row.version += 1;
        row.updated_at = Utc::now();
        let code = row.clone();

        // Published under the write lock so the feed follows commit order
        self.publish(CodeChange {
            previous_status,
            code: code.clone(),
        });

        Ok(CasOutcome::Applied(code))
    }

    fn changes(&self) -> mpsc::UnboundedReceiver<CodeChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feed.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }
}

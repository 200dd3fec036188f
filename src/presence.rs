//! Best-effort headcount of observers connected to each room
//!
//! Used for display only. A participant may hold several connections (tabs)
//! and is counted once. Participants without a heartbeat within the timeout
//! stop being counted until they heartbeat again; their open connections are
//! still tracked so a later disconnect does not undercount.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::types::{ParticipantId, RoomId};

struct Entry {
    connections: usize,
    last_seen: Instant,
    stale: bool,
}

impl Entry {
    fn new() -> Self {
        Self {
            connections: 0,
            last_seen: Instant::now(),
            stale: false,
        }
    }
}

struct RoomPresence {
    participants: HashMap<ParticipantId, Entry>,
    count_tx: watch::Sender<usize>,
}

impl RoomPresence {
    fn new() -> Self {
        let (count_tx, _rx) = watch::channel(0);
        Self {
            participants: HashMap::new(),
            count_tx,
        }
    }

    fn live(&self) -> usize {
        self.participants.values().filter(|e| !e.stale).count()
    }

    fn publish(&self) {
        let count = self.live();
        self.count_tx.send_if_modified(|current| {
            if *current != count {
                *current = count;
                true
            } else {
                false
            }
        });
    }
}

#[derive(Default)]
pub struct PresenceTracker {
    rooms: Mutex<HashMap<RoomId, RoomPresence>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, RoomPresence>> {
        // Presence is advisory; a poisoned map is still usable
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connection for `participant` in `room`. The returned handle
    /// keeps the participant counted until it is dropped.
    pub fn join(self: &Arc<Self>, room_id: &str, participant_id: &str) -> PresenceHandle {
        let mut rooms = self.lock();
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomPresence::new);
        let entry = room
            .participants
            .entry(participant_id.to_string())
            .or_insert_with(Entry::new);
        entry.connections += 1;
        entry.last_seen = Instant::now();
        entry.stale = false;
        room.publish();

        PresenceHandle {
            tracker: Arc::clone(self),
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            counts: room.count_tx.subscribe(),
        }
    }

    fn heartbeat(&self, room_id: &str, participant_id: &str) {
        let mut rooms = self.lock();
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomPresence::new);
        let entry = room
            .participants
            .entry(participant_id.to_string())
            .or_insert_with(|| Entry {
                connections: 1,
                ..Entry::new()
            });
        entry.last_seen = Instant::now();
        entry.stale = false;
        room.publish();
    }

    fn leave(&self, room_id: &str, participant_id: &str) {
        let mut rooms = self.lock();
        if let Some(room) = rooms.get_mut(room_id) {
            if let Some(entry) = room.participants.get_mut(participant_id) {
                entry.connections = entry.connections.saturating_sub(1);
                if entry.connections == 0 {
                    room.participants.remove(participant_id);
                }
            }
            room.publish();
        }
    }

    pub fn count(&self, room_id: &str) -> usize {
        self.lock()
            .get(room_id)
            .map(RoomPresence::live)
            .unwrap_or(0)
    }

    /// Watch a room's headcount without being counted
    pub fn watch(&self, room_id: &str) -> watch::Receiver<usize> {
        self.lock()
            .entry(room_id.to_string())
            .or_insert_with(RoomPresence::new)
            .count_tx
            .subscribe()
    }

    /// Stop counting participants whose last heartbeat is older than
    /// `timeout`. Returns how many stopped being counted.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let mut idle = 0;
        let mut rooms = self.lock();
        for room in rooms.values_mut() {
            for entry in room.participants.values_mut() {
                if !entry.stale && now.duration_since(entry.last_seen) >= timeout {
                    entry.stale = true;
                    idle += 1;
                }
            }
            room.participants.retain(|_, e| e.connections > 0);
            room.publish();
        }
        // Forget rooms nobody is in or watching
        rooms.retain(|_, r| !r.participants.is_empty() || r.count_tx.receiver_count() > 0);
        idle
    }
}

/// Keeps one connection counted; leaves on drop
pub struct PresenceHandle {
    tracker: Arc<PresenceTracker>,
    room_id: RoomId,
    participant_id: ParticipantId,
    counts: watch::Receiver<usize>,
}

impl PresenceHandle {
    pub fn heartbeat(&self) {
        self.tracker.heartbeat(&self.room_id, &self.participant_id);
    }

    /// Headcount stream for this room
    pub fn counts(&self) -> watch::Receiver<usize> {
        self.counts.clone()
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        self.tracker.leave(&self.room_id, &self.participant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_counted_once() {
        let tracker = Arc::new(PresenceTracker::new());
        let tab1 = tracker.join("r", "alice");
        let tab2 = tracker.join("r", "alice");
        let _bob = tracker.join("r", "bob");
        assert_eq!(tracker.count("r"), 2);

        drop(tab1);
        assert_eq!(tracker.count("r"), 2);
        drop(tab2);
        assert_eq!(tracker.count("r"), 1);
    }

    #[test]
    fn test_rooms_are_independent() {
        let tracker = Arc::new(PresenceTracker::new());
        let _a = tracker.join("r1", "alice");
        assert_eq!(tracker.count("r1"), 1);
        assert_eq!(tracker.count("r2"), 0);
    }

    #[tokio::test]
    async fn test_count_stream_updates() {
        let tracker = Arc::new(PresenceTracker::new());
        let alice = tracker.join("r", "alice");
        let mut counts = alice.counts();
        assert_eq!(*counts.borrow_and_update(), 1);

        let bob = tracker.join("r", "bob");
        counts.changed().await.unwrap();
        assert_eq!(*counts.borrow_and_update(), 2);

        drop(bob);
        counts.changed().await.unwrap();
        assert_eq!(*counts.borrow(), 1);
    }

    #[test]
    fn test_sweep_stops_counting_silent_participants() {
        let tracker = Arc::new(PresenceTracker::new());
        let alice = tracker.join("r", "alice");
        std::thread::sleep(Duration::from_millis(20));
        let _bob = tracker.join("r", "bob");

        let idle = tracker.sweep(Duration::from_millis(10));
        assert_eq!(idle, 1);
        assert_eq!(tracker.count("r"), 1);

        // A heartbeat brings a swept participant back
        alice.heartbeat();
        assert_eq!(tracker.count("r"), 2);

        // Already stale participants are not counted twice
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(tracker.sweep(Duration::from_millis(10)), 2);
        assert_eq!(tracker.sweep(Duration::from_millis(10)), 0);
        assert_eq!(tracker.count("r"), 0);
    }

    #[test]
    fn test_swept_participant_keeps_every_tab() {
        let tracker = Arc::new(PresenceTracker::new());
        let tab1 = tracker.join("r", "alice");
        let tab2 = tracker.join("r", "alice");
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(tracker.sweep(Duration::from_millis(10)), 1);
        assert_eq!(tracker.count("r"), 0);

        tab1.heartbeat();
        assert_eq!(tracker.count("r"), 1);

        // Closing one tab leaves the other counted
        drop(tab1);
        assert_eq!(tracker.count("r"), 1);
        drop(tab2);
        assert_eq!(tracker.count("r"), 0);
    }
}

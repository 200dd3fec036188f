//! Per-room change fan-out
//!
//! The store publishes committed row changes on a single feed. A relay task
//! (see `broadcast::spawn_change_relay`) hands each change to the
//! `ChangeNotifier`, which numbers it with a per-room sequence, keeps it in a
//! bounded replay backlog and broadcasts it to the room's subscribers.
//!
//! Delivery is at-least-once: a subscriber resuming from an older sequence, or
//! one that fell behind the live channel, is re-fed from the backlog and may
//! see the same event twice. Consumers dedup on `CodeEvent::key`.

use futures::stream::{self, Stream};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;

use crate::store::CodeChange;
use crate::types::*;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct RoomChannel {
    tx: broadcast::Sender<CodeEvent>,
    backlog: VecDeque<CodeEvent>,
    next_seq: u64,
}

impl RoomChannel {
    fn new(channel_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(channel_capacity);
        Self {
            tx,
            backlog: VecDeque::new(),
            next_seq: 1,
        }
    }

    fn since(&self, seq: u64) -> VecDeque<CodeEvent> {
        self.backlog.iter().filter(|e| e.seq > seq).cloned().collect()
    }
}

pub struct ChangeNotifier {
    rooms: RwLock<HashMap<RoomId, RoomChannel>>,
    replay_capacity: usize,
    channel_capacity: usize,
}

impl ChangeNotifier {
    pub fn new(replay_capacity: usize) -> Self {
        Self::with_capacity(replay_capacity, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(replay_capacity: usize, channel_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            replay_capacity: replay_capacity.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Number a committed change, remember it for replay and fan it out
    pub async fn publish(&self, change: CodeChange) -> CodeEvent {
        let mut rooms = self.rooms.write().await;
        let channel = rooms
            .entry(change.code.room_id.clone())
            .or_insert_with(|| RoomChannel::new(self.channel_capacity));

        let event = CodeEvent::new(channel.next_seq, change.previous_status, change.code);
        channel.next_seq += 1;

        channel.backlog.push_back(event.clone());
        while channel.backlog.len() > self.replay_capacity {
            channel.backlog.pop_front();
        }

        // No subscribers is fine
        let _ = channel.tx.send(event.clone());
        event
    }

    /// Subscribe to a room. With `since`, backlog events newer than that
    /// sequence are delivered first.
    pub async fn subscribe(self: &Arc<Self>, room_id: &str, since: Option<u64>) -> RoomSubscription {
        let mut rooms = self.rooms.write().await;
        let channel = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomChannel::new(self.channel_capacity));

        let rx = channel.tx.subscribe();
        let replay = match since {
            Some(seq) => {
                if let Some(oldest) = channel.backlog.front() {
                    if oldest.seq > seq.saturating_add(1) {
                        tracing::warn!(
                            room_id,
                            since = seq,
                            oldest = oldest.seq,
                            "Resume point is older than the replay backlog"
                        );
                    }
                }
                channel.since(seq)
            }
            None => VecDeque::new(),
        };
        // A resume point from before a restart can be ahead of this room's sequence
        let current = channel.next_seq - 1;
        let last_seq = since.map_or(current, |seq| seq.min(current));

        RoomSubscription {
            room_id: room_id.to_string(),
            notifier: Arc::clone(self),
            rx,
            replay,
            last_seq,
            needs_resync: false,
        }
    }

    /// Backlog events for a room with sequence greater than `since`
    pub async fn replay(&self, room_id: &str, since: u64) -> Vec<CodeEvent> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|c| c.since(since).into())
            .unwrap_or_default()
    }

    /// Sequence of the most recent event published for a room (0 if none)
    pub async fn last_seq(&self, room_id: &str) -> u64 {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|c| c.next_seq - 1)
            .unwrap_or(0)
    }

    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|c| c.tx.receiver_count())
            .unwrap_or(0)
    }
}

/// A live, resumable view of one room's change events
pub struct RoomSubscription {
    room_id: RoomId,
    notifier: Arc<ChangeNotifier>,
    rx: broadcast::Receiver<CodeEvent>,
    replay: VecDeque<CodeEvent>,
    last_seq: u64,
    needs_resync: bool,
}

impl RoomSubscription {
    /// Next event, or None once the notifier is gone. Cancel safe.
    pub async fn next(&mut self) -> Option<CodeEvent> {
        loop {
            if self.needs_resync {
                // Flag is cleared only after the backlog is in hand, so a
                // cancelled resync is redone on the next call
                let missed = self.notifier.replay(&self.room_id, self.last_seq).await;
                self.replay.extend(missed);
                self.needs_resync = false;
            }

            if let Some(event) = self.replay.pop_front() {
                self.last_seq = self.last_seq.max(event.seq);
                return Some(event);
            }

            match self.rx.recv().await {
                // Already handed out by a backlog resync
                Ok(event) if event.seq <= self.last_seq => continue,
                Ok(event) => {
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        room_id = %self.room_id,
                        skipped,
                        last_seq = self.last_seq,
                        "Subscriber lagged, replaying from backlog"
                    );
                    self.needs_resync = true;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Highest sequence handed out so far; pass it as `since` to resume
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn into_stream(self) -> impl Stream<Item = CodeEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;

    fn change(room: &str, id: &str, from: CodeStatus, to: CodeStatus) -> CodeChange {
        CodeChange {
            previous_status: from,
            code: Code {
                id: id.to_string(),
                room_id: room.to_string(),
                code: "1234".to_string(),
                status: to,
                assigned_to: None,
                version: 2,
                updated_at: Utc::now(),
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_room_events_only() {
        let notifier = Arc::new(ChangeNotifier::new(16));
        let mut sub = notifier.subscribe("room-a", None).await;

        notifier
            .publish(change("room-b", "x", CodeStatus::Pending, CodeStatus::Testing))
            .await;
        notifier
            .publish(change("room-a", "y", CodeStatus::Pending, CodeStatus::Testing))
            .await;

        let event = sub.next().await.unwrap();
        assert_eq!(event.code.id, "y");
        assert_eq!(event.seq, 1);
        assert_eq!(event.key.to_string(), "y-testing");
        assert_eq!(sub.last_seq(), 1);
    }

    #[tokio::test]
    async fn test_sequences_are_per_room() {
        let notifier = ChangeNotifier::new(16);
        let a1 = notifier
            .publish(change("a", "1", CodeStatus::Pending, CodeStatus::Testing))
            .await;
        let b1 = notifier
            .publish(change("b", "2", CodeStatus::Pending, CodeStatus::Testing))
            .await;
        let a2 = notifier
            .publish(change("a", "1", CodeStatus::Testing, CodeStatus::Failed))
            .await;
        assert_eq!((a1.seq, b1.seq, a2.seq), (1, 1, 2));
        assert_eq!(notifier.last_seq("a").await, 2);
        assert_eq!(notifier.last_seq("unknown").await, 0);
    }

    #[tokio::test]
    async fn test_resume_replays_backlog_then_live() {
        let notifier = Arc::new(ChangeNotifier::new(16));
        for id in ["1", "2", "3"] {
            notifier
                .publish(change("r", id, CodeStatus::Pending, CodeStatus::Testing))
                .await;
        }

        let sub = notifier.subscribe("r", Some(1)).await;
        notifier
            .publish(change("r", "4", CodeStatus::Pending, CodeStatus::Testing))
            .await;

        let ids: Vec<String> = sub.into_stream().take(3).map(|e| e.code.id).collect().await;
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_resume_from_stale_point_redelivers() {
        let notifier = Arc::new(ChangeNotifier::new(16));
        notifier
            .publish(change("r", "1", CodeStatus::Pending, CodeStatus::Testing))
            .await;

        let mut first = notifier.subscribe("r", Some(0)).await;
        let seen = first.next().await.unwrap();

        // Reconnect claiming nothing was seen: the same event comes again
        let mut second = notifier.subscribe("r", Some(0)).await;
        let again = second.next().await.unwrap();
        assert_eq!(seen.key, again.key);
        assert_eq!(seen.seq, again.seq);
    }

    #[tokio::test]
    async fn test_backlog_is_bounded() {
        let notifier = ChangeNotifier::new(2);
        for id in ["1", "2", "3"] {
            notifier
                .publish(change("r", id, CodeStatus::Pending, CodeStatus::Testing))
                .await;
        }
        let replay = notifier.replay("r", 0).await;
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].seq, 2);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_resyncs_from_backlog() {
        let notifier = Arc::new(ChangeNotifier::with_capacity(64, 2));
        let mut sub = notifier.subscribe("r", None).await;

        for i in 0..6 {
            notifier
                .publish(change("r", &i.to_string(), CodeStatus::Pending, CodeStatus::Testing))
                .await;
        }

        let mut seqs = Vec::new();
        for _ in 0..6 {
            seqs.push(sub.next().await.unwrap().seq);
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_resume_point_ahead_of_sequence_still_gets_live_events() {
        let notifier = Arc::new(ChangeNotifier::new(16));
        let mut sub = notifier.subscribe("r", Some(50)).await;
        assert_eq!(sub.last_seq(), 0);

        notifier
            .publish(change("r", "1", CodeStatus::Pending, CodeStatus::Testing))
            .await;
        assert_eq!(sub.next().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let notifier = Arc::new(ChangeNotifier::new(4));
        assert_eq!(notifier.subscriber_count("r").await, 0);
        let sub = notifier.subscribe("r", None).await;
        assert_eq!(notifier.subscriber_count("r").await, 1);
        drop(sub);
        assert_eq!(notifier.subscriber_count("r").await, 0);
    }
}

use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the task that moves committed row changes from the store feed into
/// the per-room notifier
pub fn spawn_change_relay(state: Arc<AppState>) -> JoinHandle<()> {
    // Subscribe before spawning so no change committed after this call is lost
    let mut feed = state.store.changes();
    tokio::spawn(async move {
        while let Some(change) = feed.recv().await {
            let event = state.notifier.publish(change).await;
            tracing::trace!(
                room_id = %event.code.room_id,
                seq = event.seq,
                key = %event.key,
                "Change published"
            );
        }
        tracing::info!("Store change feed closed, relay stopping");
    })
}

/// Spawn a background task that stops counting participants with no recent heartbeat
pub fn spawn_presence_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let timeout = state.config.presence_timeout;
    let period = (timeout / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let idle = state.presence.sweep(timeout);
            if idle > 0 {
                tracing::debug!(idle, "Swept idle participants");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;
    use crate::types::CodeStatus;

    #[tokio::test]
    async fn test_relay_feeds_room_subscribers() {
        let state = Arc::new(state_with_pool(&["1234"]));
        let relay = spawn_change_relay(state.clone());
        let room = seeded_room(&state, "r").await;

        let mut sub = state.subscribe_to_room(&room.id, None).await.unwrap();
        let claimed = state.claim_next(&room.id, None).await.unwrap();
        let code = claimed.code().unwrap();

        let event = sub.next().await.unwrap();
        assert_eq!(event.code.id, code.id);
        assert_eq!(event.previous_status, CodeStatus::Pending);
        assert_eq!(event.key.status, CodeStatus::Testing);
        relay.abort();
    }

    #[tokio::test]
    async fn test_relay_delivers_every_commit_in_a_burst() {
        let values: Vec<String> = (0..300).map(|n| format!("{:04}", n)).collect();
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        let state = Arc::new(state_with_pool(&values));
        let room = seeded_room(&state, "r").await;
        let mut sub = state.subscribe_to_room(&room.id, None).await.unwrap();
        let relay = spawn_change_relay(state.clone());

        // More commits than the room channel holds, so the subscriber lags
        for _ in 0..300 {
            state.claim_next(&room.id, None).await.unwrap();
        }

        let mut seqs = Vec::new();
        for _ in 0..300 {
            seqs.push(sub.next().await.unwrap().seq);
        }
        assert_eq!(seqs, (1..=300).collect::<Vec<u64>>());
        assert_eq!(state.notifier.last_seq(&room.id).await, 300);
        assert_eq!(state.notifier.replay(&room.id, 0).await.len(), 300);
        relay.abort();
    }
}

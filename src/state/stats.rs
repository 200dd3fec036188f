use super::AppState;
use crate::error::CoordinatorResult;
use crate::types::*;

impl AppState {
    /// Count a room's codes by status with a full scan. Always reflects
    /// committed state, so every call recomputes.
    pub async fn get_room_stats(&self, room_id: &str) -> CoordinatorResult<RoomStats> {
        let codes = self.room_snapshot(room_id).await?;
        let stats = RoomStats::from_statuses(codes.iter().map(|c| c.status));
        tracing::trace!(room_id, ?stats, "Room stats computed");
        Ok(stats)
    }

    /// Every row in the room, for observers that seed a tally
    pub async fn room_snapshot(&self, room_id: &str) -> CoordinatorResult<Vec<Code>> {
        self.require_room(room_id).await?;
        Ok(self.store.codes_in_room(room_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::error::CoordinatorError;
    use crate::types::*;

    #[tokio::test]
    async fn test_stats_follow_claims_and_outcomes() {
        let state = state_with_pool(&["1", "2", "3", "4"]);
        let room = seeded_room(&state, "r").await;

        let fresh = state.get_room_stats(&room.id).await.unwrap();
        assert_eq!(fresh.total, 4);
        assert_eq!(fresh.pending, 4);

        let a = state.claim_next(&room.id, None).await.unwrap().code().cloned().unwrap();
        let b = state.claim_next(&room.id, None).await.unwrap().code().cloned().unwrap();
        state.record_outcome(&a.id, CodeStatus::Failed).await.unwrap();
        state.record_outcome(&b.id, CodeStatus::Success).await.unwrap();
        state.claim_next(&room.id, None).await.unwrap();

        let stats = state.get_room_stats(&room.id).await.unwrap();
        assert_eq!(
            stats,
            RoomStats {
                total: 4,
                pending: 1,
                testing: 1,
                failed: 1,
                success: 1,
            }
        );
        assert!(stats.is_consistent());
    }

    #[tokio::test]
    async fn test_stats_unknown_room() {
        let state = state_with_pool(&[]);
        let err = state.get_room_stats("missing").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }
}

use super::AppState;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::retry;
use crate::store::{CasOutcome, CodeWrite, Precondition};
use crate::types::*;

impl AppState {
    /// Record a status for a code, parsing the status from its wire form
    pub async fn set_code_status(&self, code_id: &str, status: &str) -> CoordinatorResult<Code> {
        let status: CodeStatus = status
            .parse()
            .map_err(|e: UnknownStatus| CoordinatorError::Validation(e.to_string()))?;
        self.record_outcome(code_id, status).await
    }

    /// Set a code's status. Re-applying the current status is a no-op that
    /// returns the row unchanged. Moving back to pending clears the assignee.
    pub async fn record_outcome(&self, code_id: &str, status: CodeStatus) -> CoordinatorResult<Code> {
        if code_id.trim().is_empty() {
            return Err(CoordinatorError::Validation("Code ID is required".to_string()));
        }
        self.config
            .retry
            .run("record outcome", || self.try_record(code_id, status))
            .await
    }

    async fn try_record(&self, code_id: &str, status: CodeStatus) -> CoordinatorResult<Code> {
        let current = self
            .store
            .code(code_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Code not found".to_string()))?;

        let transition = Transition::classify(current.status, status);
        match transition {
            Transition::Unchanged => return Ok(current),
            Transition::Skip => tracing::info!(
                code_id,
                from = %current.status,
                to = %status,
                "Status change skips the usual order"
            ),
            Transition::Forward | Transition::Undo => {}
        }

        let assigned_to = match transition {
            Transition::Undo => None,
            _ => current.assigned_to.clone(),
        };
        let expected = Precondition {
            version: current.version,
            status: current.status,
        };
        let write = CodeWrite { status, assigned_to };

        match self.store.compare_and_set(code_id, expected, write).await? {
            CasOutcome::Applied(code) => {
                tracing::info!(
                    room_id = %code.room_id,
                    code_id,
                    code = %code.code,
                    from = %current.status,
                    to = %code.status,
                    "Outcome recorded"
                );
                Ok(code)
            }
            CasOutcome::Conflict => Err(retry::contention("status update")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    async fn claimed(state: &AppState) -> Code {
        let room = seeded_room(state, "r").await;
        state
            .claim_next(&room.id, Some("raider"))
            .await
            .unwrap()
            .code()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_failed() {
        let state = state_with_pool(&["1234"]);
        let code = claimed(&state).await;

        let updated = state.set_code_status(&code.id, "failed").await.unwrap();
        assert_eq!(updated.status, CodeStatus::Failed);
        assert_eq!(updated.assigned_to.as_deref(), Some("raider"));
        assert!(updated.version > code.version);
    }

    #[tokio::test]
    async fn test_same_status_twice_is_idempotent() {
        let state = state_with_pool(&["1234"]);
        let code = claimed(&state).await;
        let mut feed = state.store.changes();

        let first = state.record_outcome(&code.id, CodeStatus::Success).await.unwrap();
        let second = state.record_outcome(&code.id, CodeStatus::Success).await.unwrap();
        assert_eq!(first, second);

        // Only the first call produced a change
        assert!(feed.recv().await.is_some());
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undo_returns_code_to_pool() {
        let state = state_with_pool(&["1234"]);
        let code = claimed(&state).await;

        let undone = state.record_outcome(&code.id, CodeStatus::Pending).await.unwrap();
        assert_eq!(undone.status, CodeStatus::Pending);
        assert_eq!(undone.assigned_to, None);

        let again = state.claim_next(&code.room_id, None).await.unwrap();
        assert_eq!(again.code().unwrap().id, code.id);
    }

    #[tokio::test]
    async fn test_skip_transition_is_accepted() {
        let state = state_with_pool(&["1234"]);
        let room = seeded_room(&state, "r").await;
        let id = state.store.pending_codes(&room.id).await.unwrap()[0].id.clone();

        let code = state.record_outcome(&id, CodeStatus::Success).await.unwrap();
        assert_eq!(code.status, CodeStatus::Success);
    }

    #[tokio::test]
    async fn test_invalid_status_and_unknown_code() {
        let state = state_with_pool(&["1234"]);
        let code = claimed(&state).await;

        let err = state.set_code_status(&code.id, "done").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
        let stored = state.store.code(&code.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CodeStatus::Testing);

        let err = state.set_code_status("missing", "failed").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }
}

use serde::Serialize;

use super::AppState;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::retry;
use crate::store::{CasOutcome, CodeWrite, Precondition};
use crate::types::*;

/// Result of asking for the next code to test
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "code", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// The code was moved from pending to testing for this caller
    Claimed(Code),
    /// No pending codes remain in the room. Not an error.
    Exhausted,
}

impl ClaimOutcome {
    pub fn code(&self) -> Option<&Code> {
        match self {
            ClaimOutcome::Claimed(code) => Some(code),
            ClaimOutcome::Exhausted => None,
        }
    }
}

impl AppState {
    /// Atomically pick one pending code, weighted by popularity, and mark it
    /// testing. No two concurrent callers ever receive the same code.
    pub async fn claim_next(
        &self,
        room_id: &str,
        requester_id: Option<&str>,
    ) -> CoordinatorResult<ClaimOutcome> {
        if room_id.trim().is_empty() {
            return Err(CoordinatorError::Validation("Room ID is required".to_string()));
        }
        let requester = requester_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        self.config
            .retry
            .run("claim", || self.try_claim(room_id, requester.clone()))
            .await
    }

    async fn try_claim(
        &self,
        room_id: &str,
        requester: Option<RequesterId>,
    ) -> CoordinatorResult<ClaimOutcome> {
        let pending = self.store.pending_codes(room_id).await?;
        if pending.is_empty() {
            self.require_room(room_id).await?;
            tracing::debug!(room_id, "No pending codes left");
            return Ok(ClaimOutcome::Exhausted);
        }

        let chosen = {
            let mut rng = rand::rng();
            match self.selector.pick(&pending, &mut rng) {
                Some(i) => &pending[i],
                None => return Ok(ClaimOutcome::Exhausted),
            }
        };

        let expected = Precondition {
            version: chosen.version,
            status: CodeStatus::Pending,
        };
        let write = CodeWrite {
            status: CodeStatus::Testing,
            assigned_to: requester,
        };

        match self.store.compare_and_set(&chosen.id, expected, write).await? {
            CasOutcome::Applied(code) => {
                tracing::info!(
                    room_id,
                    code_id = %code.id,
                    code = %code.code,
                    assigned_to = ?code.assigned_to,
                    "Code claimed"
                );
                Ok(ClaimOutcome::Claimed(code))
            }
            CasOutcome::Conflict => {
                tracing::debug!(room_id, code_id = %chosen.id, "Claim lost race");
                Err(retry::contention("claim"))
            }
        }
    }
}

mod claim;
mod outcome;
mod room;
mod stats;

pub use claim::ClaimOutcome;
pub use room::CreatedRoom;

use std::sync::Arc;

use crate::config::Config;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::notifier::{ChangeNotifier, RoomSubscription};
use crate::observer::RoomView;
use crate::popularity::{PopularityRanks, WeightBands, WeightedSelector};
use crate::presence::{PresenceHandle, PresenceTracker};
use crate::seed::{PoolLoader, SequentialLoader};
use crate::store::{CodeStore, MemoryStore};
use crate::types::*;

/// Shared application state
///
/// Handlers hold no state of their own; everything goes through the store.
/// The notifier and presence tracker are read-side hubs fed from it.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CodeStore>,
    pub selector: Arc<WeightedSelector>,
    pub loader: Arc<dyn PoolLoader>,
    pub notifier: Arc<ChangeNotifier>,
    pub presence: Arc<PresenceTracker>,
}

impl AppState {
    /// In-memory store with a sequential pool loader
    pub fn new(config: Config) -> Self {
        let selector = WeightedSelector::new(Self::load_ranks(&config), WeightBands::default());
        let loader = SequentialLoader::new(config.code_digits);
        Self::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            selector,
            Arc::new(loader),
        )
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn CodeStore>,
        selector: WeightedSelector,
        loader: Arc<dyn PoolLoader>,
    ) -> Self {
        let notifier = Arc::new(ChangeNotifier::new(config.replay_buffer));
        Self {
            config,
            store,
            selector: Arc::new(selector),
            loader,
            notifier,
            presence: Arc::new(PresenceTracker::new()),
        }
    }

    /// Load the popularity list from the configured file, if any
    pub fn load_ranks(config: &Config) -> PopularityRanks {
        match &config.rank_file {
            Some(path) => match PopularityRanks::from_file(path) {
                Ok(ranks) if !ranks.is_empty() => {
                    tracing::info!(path = %path.display(), ranks = ranks.len(), "Loaded popularity list");
                    ranks
                }
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "Popularity list is empty, using built-in list");
                    PopularityRanks::builtin()
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read popularity list, using built-in list");
                    PopularityRanks::builtin()
                }
            },
            None => PopularityRanks::builtin(),
        }
    }

    pub(crate) async fn require_room(&self, room_id: &str) -> CoordinatorResult<Room> {
        self.store
            .room(room_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound("Room not found".to_string()))
    }

    /// Change events for a room, optionally replayed from `since`
    pub async fn subscribe_to_room(
        &self,
        room_id: &str,
        since: Option<u64>,
    ) -> CoordinatorResult<RoomSubscription> {
        self.require_room(room_id).await?;
        Ok(self.notifier.subscribe(room_id, since).await)
    }

    /// Subscribe first, then scan, so nothing committed in between is missed.
    /// Events the scan already reflects are ignored by the view.
    pub async fn open_room_view(
        &self,
        room_id: &str,
        since: Option<u64>,
    ) -> CoordinatorResult<(RoomSubscription, RoomView)> {
        let subscription = self.subscribe_to_room(room_id, since).await?;
        let codes = self.room_snapshot(room_id).await?;
        let view = RoomView::from_snapshot(&codes, self.config.dedup_capacity);
        Ok((subscription, view))
    }

    /// Count `participant_id` as present in the room until the handle drops
    pub async fn subscribe_to_presence(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> CoordinatorResult<PresenceHandle> {
        if participant_id.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "Participant ID is required".to_string(),
            ));
        }
        self.require_room(room_id).await?;
        Ok(self.presence.join(room_id, participant_id))
    }
}

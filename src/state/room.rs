use tokio::task::JoinHandle;

use super::AppState;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::types::*;

const MAX_ROOM_NAME_LEN: usize = 100;

/// A freshly created room and its background seeding task
///
/// The room is usable as soon as it is returned. Seeding runs detached; the
/// handle resolves to the number of codes inserted (0 if loading failed).
pub struct CreatedRoom {
    pub room: Room,
    pub seeding: JoinHandle<usize>,
}

impl AppState {
    /// Create a room and start filling its pool in the background
    pub async fn create_room(&self, name: &str) -> CoordinatorResult<CreatedRoom> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoordinatorError::Validation(
                "Room name is required".to_string(),
            ));
        }
        if name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(CoordinatorError::Validation(format!(
                "Room name must be at most {} characters",
                MAX_ROOM_NAME_LEN
            )));
        }

        let room = self.store.insert_room(name).await?;
        tracing::info!(room_id = %room.id, name = %room.name, "Room created");

        let store = self.store.clone();
        let loader = self.loader.clone();
        let room_id = room.id.clone();
        let seeding = tokio::spawn(async move {
            match loader.populate(store.as_ref(), &room_id).await {
                Ok(inserted) => {
                    tracing::info!(room_id = %room_id, inserted, "Room pool seeded");
                    inserted
                }
                Err(e) => {
                    // The room stays usable; its pool is simply empty or partial
                    tracing::error!(room_id = %room_id, error = %e, "Failed to seed room pool");
                    0
                }
            }
        });

        Ok(CreatedRoom { room, seeding })
    }

    pub async fn get_room_by_name(&self, name: &str) -> CoordinatorResult<Option<Room>> {
        Ok(self.store.room_by_name(name.trim()).await?)
    }

    pub async fn get_room(&self, room_id: &str) -> CoordinatorResult<Option<Room>> {
        Ok(self.store.room(room_id).await?)
    }

    /// Toggle the room's `active` flag. Informational only; claims ignore it.
    pub async fn set_room_active(&self, room_id: &str, active: bool) -> CoordinatorResult<Room> {
        let room = self.store.set_room_active(room_id, active).await?;
        tracing::info!(room_id, active, "Room active flag changed");
        Ok(room)
    }
}

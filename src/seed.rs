//! Initial population of a room's code pool

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::CodeStore;

/// Rows inserted per store call
const BATCH_SIZE: usize = 1000;

/// Bulk-load collaborator that fills a freshly created room
#[async_trait]
pub trait PoolLoader: Send + Sync {
    /// Insert the room's codes, returning how many rows were added
    async fn populate(&self, store: &dyn CodeStore, room_id: &str) -> Result<usize, StoreError>;
}

/// Every zero-padded value of `digits` width: 0000..9999 for 4 digits
#[derive(Debug, Clone, Copy)]
pub struct SequentialLoader {
    pub digits: u32,
}

impl Default for SequentialLoader {
    fn default() -> Self {
        Self { digits: 4 }
    }
}

impl SequentialLoader {
    pub fn new(digits: u32) -> Self {
        Self { digits }
    }

    pub fn values(&self) -> impl Iterator<Item = String> {
        let width = self.digits as usize;
        (0..10u64.pow(self.digits)).map(move |n| format!("{:0width$}", n, width = width))
    }
}

#[async_trait]
impl PoolLoader for SequentialLoader {
    async fn populate(&self, store: &dyn CodeStore, room_id: &str) -> Result<usize, StoreError> {
        let values: Vec<String> = self.values().collect();
        let mut inserted = 0;
        for batch in values.chunks(BATCH_SIZE) {
            inserted += store.insert_codes(room_id, batch).await?;
            tracing::trace!(room_id, inserted, total = values.len(), "Seeded batch");
        }
        Ok(inserted)
    }
}

/// A fixed list of values, mostly for small rooms and tests
#[derive(Debug, Clone, Default)]
pub struct ListLoader {
    pub values: Vec<String>,
}

impl ListLoader {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PoolLoader for ListLoader {
    async fn populate(&self, store: &dyn CodeStore, room_id: &str) -> Result<usize, StoreError> {
        store.insert_codes(room_id, &self.values).await
    }
}

// src/serving/slot.rs
use crate::models::TrainedModel;
use crate::serving::types::ServedVersion;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A model and the version that produced it. Built completely before it is published and
/// never modified afterwards.
#[derive(Debug)]
pub struct LoadedModel {
    pub model: TrainedModel,
    pub version: ServedVersion,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    pub fn new(model: TrainedModel, version: ServedVersion) -> Self {
        Self {
            model,
            version,
            loaded_at: Utc::now(),
        }
    }
}

/// The active model slot. Readers clone the `Arc` under a short read lock and score
/// against that snapshot; a swap replaces the whole `Arc` under the write lock.
#[derive(Debug, Default)]
pub struct ModelSlot {
    current: RwLock<Option<Arc<LoadedModel>>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Option<Arc<LoadedModel>> {
        self.current.read().await.clone()
    }

    /// Publishes `next` and returns what it replaced.
    pub async fn swap(&self, next: Arc<LoadedModel>) -> Option<Arc<LoadedModel>> {
        let mut guard = self.current.write().await;
        guard.replace(next)
    }

    pub async fn is_empty(&self) -> bool {
        self.current.read().await.is_none()
    }
}

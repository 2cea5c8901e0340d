// src/registry/mod.rs
pub mod fs;

use crate::error::Result;
use crate::training::run::TrainingRun;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use fs::FsModelRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        };
        f.write_str(s)
    }
}

/// A registry entry. Only `stage` and `updated_at` change after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub stage: Stage,
    pub run_id: String,
    pub candidate: String,
    pub test_accuracy: Option<f64>,
    /// Hex SHA-256 of the stored artifact.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Name-scoped model versioning with at most one `Production` version per name.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Stores the artifact under the next version number for `name`. The new version
    /// starts in `Stage::None`. Registering a run that is already registered returns its
    /// existing entry instead of a new version.
    async fn register(&self, name: &str, run: &TrainingRun, artifact: &[u8])
        -> Result<ModelVersion>;

    /// Moves `version` to `stage`. Promoting to `Production` archives whichever version
    /// held it before.
    async fn promote(&self, name: &str, version: u32, stage: Stage) -> Result<ModelVersion>;

    /// The current production version, or `None` on a cold registry.
    async fn get_production(&self, name: &str) -> Result<Option<ModelVersion>>;

    /// Artifact bytes of `version`, verified against the digest recorded at registration.
    async fn load_artifact(&self, name: &str, version: u32) -> Result<Vec<u8>>;

    async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>>;
}

// src/registry/fs.rs
use crate::error::{LifecycleError, Result};
use crate::registry::{ModelRegistry, ModelVersion, Stage};
use crate::training::run::TrainingRun;
use crate::training::tracking::{io_unavailable, validate_component, write_atomic};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const INDEX_FILE: &str = "versions.json";
const MODEL_FILE: &str = "model.json";

/// Registry kept under `<root>/registry/<name>/`: a `versions.json` index plus one
/// `v<N>/model.json` copy of each registered artifact.
pub struct FsModelRegistry {
    root: PathBuf,
    // Serializes read-modify-write cycles on the index files.
    write_lock: Mutex<()>,
}

impl FsModelRegistry {
    pub fn new(artifact_root: impl AsRef<Path>) -> Self {
        Self {
            root: artifact_root.as_ref().join("registry"),
            write_lock: Mutex::new(()),
        }
    }

    fn model_dir(&self, name: &str) -> Result<PathBuf> {
        validate_component("model name", name)?;
        Ok(self.root.join(name))
    }

    async fn read_index(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let path = self.model_dir(name)?.join(INDEX_FILE);
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                LifecycleError::Artifact(format!("corrupt index {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_unavailable("read", &path, e)),
        }
    }

    async fn write_index(&self, name: &str, versions: &[ModelVersion]) -> Result<()> {
        let path = self.model_dir(name)?.join(INDEX_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(versions)?).await
    }
}

#[async_trait]
impl ModelRegistry for FsModelRegistry {
    async fn register(&self, name: &str, run: &TrainingRun, artifact: &[u8]) -> Result<ModelVersion> {
        let dir = self.model_dir(name)?;
        let _guard = self.write_lock.lock().await;

        let mut versions = self.read_index(name).await?;
        let sha256 = hex::encode(Sha256::digest(artifact));

        // A retried call whose first attempt already landed gets the existing entry back.
        if let Some(existing) = versions.iter().find(|v| v.run_id == run.run_id) {
            if existing.sha256 != sha256 {
                return Err(LifecycleError::Artifact(format!(
                    "run {} is already registered as {} version {} with a different artifact",
                    run.run_id, name, existing.version
                )));
            }
            info!(
                "Run {} is already registered as {} version {}",
                run.run_id, name, existing.version
            );
            return Ok(existing.clone());
        }

        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        write_atomic(&dir.join(format!("v{}", version)).join(MODEL_FILE), artifact).await?;

        let now = Utc::now();
        let entry = ModelVersion {
            name: name.to_string(),
            version,
            stage: Stage::None,
            run_id: run.run_id.clone(),
            candidate: run.candidate.clone(),
            test_accuracy: run.test_accuracy,
            sha256,
            created_at: now,
            updated_at: now,
        };
        versions.push(entry.clone());
        self.write_index(name, &versions).await?;

        info!(
            "📦 Registered {} version {} from run {} ({})",
            name, version, run.run_id, run.candidate
        );
        Ok(entry)
    }

    async fn promote(&self, name: &str, version: u32, stage: Stage) -> Result<ModelVersion> {
        let _guard = self.write_lock.lock().await;
        let mut versions = self.read_index(name).await?;

        if !versions.iter().any(|v| v.version == version) {
            return Err(LifecycleError::InvalidParameter(format!(
                "{} has no version {}",
                name, version
            )));
        }

        let now = Utc::now();
        let mut promoted = None;
        for entry in versions.iter_mut() {
            if entry.version == version {
                entry.stage = stage;
                entry.updated_at = now;
                promoted = Some(entry.clone());
            } else if stage == Stage::Production && entry.stage == Stage::Production {
                info!("Archiving {} version {} (was Production)", name, entry.version);
                entry.stage = Stage::Archived;
                entry.updated_at = now;
            }
        }
        self.write_index(name, &versions).await?;

        let promoted = promoted.ok_or_else(|| {
            LifecycleError::InvalidParameter(format!("{} has no version {}", name, version))
        })?;
        info!("🚀 {} version {} moved to {}", name, version, stage);
        Ok(promoted)
    }

    async fn get_production(&self, name: &str) -> Result<Option<ModelVersion>> {
        let versions = self.read_index(name).await?;
        let mut production: Vec<ModelVersion> = versions
            .into_iter()
            .filter(|v| v.stage == Stage::Production)
            .collect();
        if production.len() > 1 {
            warn!(
                "{} has {} Production versions, serving the newest",
                name,
                production.len()
            );
        }
        production.sort_by_key(|v| v.version);
        Ok(production.pop())
    }

    async fn load_artifact(&self, name: &str, version: u32) -> Result<Vec<u8>> {
        let entry = self
            .read_index(name)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| {
                LifecycleError::Artifact(format!("{} version {} is not registered", name, version))
            })?;

        let path = self
            .model_dir(name)?
            .join(format!("v{}", version))
            .join(MODEL_FILE);
        let bytes = fs::read(&path).await.map_err(|e| {
            LifecycleError::Artifact(format!("cannot read {}: {}", path.display(), e))
        })?;

        let digest = hex::encode(Sha256::digest(&bytes));
        if digest != entry.sha256 {
            return Err(LifecycleError::Artifact(format!(
                "{} version {} checksum mismatch (expected {}, found {})",
                name, version, entry.sha256, digest
            )));
        }
        Ok(bytes)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let mut versions = self.read_index(name).await?;
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }
}

// src/training/tracking.rs
use crate::error::{LifecycleError, Result};
use crate::training::run::TrainingRun;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::fs;

const RUN_FILE: &str = "run.json";
const MODEL_FILE: &str = "model.json";

/// Durable store for training runs and their artifacts.
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Stores the run record and, when present, its serialized model. Returns the run id.
    async fn log_run(&self, run: &TrainingRun, artifact: Option<&[u8]>) -> Result<String>;

    async fn get_run(&self, run_id: &str) -> Result<Option<TrainingRun>>;

    async fn load_artifact(&self, run_id: &str) -> Result<Vec<u8>>;

    /// Runs of one experiment, or of every experiment when `experiment` is `None`, in
    /// start order.
    async fn list_runs(&self, experiment: Option<&str>) -> Result<Vec<TrainingRun>>;
}

/// Keeps each run under `<root>/experiments/<experiment>/<run_id>/`.
pub struct FsExperimentTracker {
    root: PathBuf,
}

impl FsExperimentTracker {
    pub fn new(artifact_root: impl AsRef<Path>) -> Self {
        Self {
            root: artifact_root.as_ref().join("experiments"),
        }
    }

    async fn find_run_dir(&self, run_id: &str) -> Result<Option<PathBuf>> {
        validate_component("run id", run_id)?;
        for experiment in list_dirs(&self.root).await? {
            let candidate = experiment.join(run_id);
            if fs::metadata(candidate.join(RUN_FILE)).await.is_ok() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

pub(crate) fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value.contains(['/', '\\'])
        || value == "."
        || value == ".."
    {
        return Err(LifecycleError::InvalidParameter(format!(
            "{} '{}' is not a valid name",
            what, value
        )));
    }
    Ok(())
}

pub(crate) fn io_unavailable(action: &str, path: &Path, e: std::io::Error) -> LifecycleError {
    LifecycleError::RegistryUnavailable(format!("failed to {} {}: {}", action, path.display(), e))
}

/// Writes next to the destination then renames into place.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_unavailable("create", parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_unavailable("write", &tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| io_unavailable("rename", path, e))
}

async fn list_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_unavailable("list", root, e)),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_unavailable("list", root, e))?
    {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[async_trait]
impl ExperimentTracker for FsExperimentTracker {
    async fn log_run(&self, run: &TrainingRun, artifact: Option<&[u8]>) -> Result<String> {
        validate_component("experiment", &run.experiment)?;
        validate_component("run id", &run.run_id)?;
        let dir = self.root.join(&run.experiment).join(&run.run_id);

        if let Some(bytes) = artifact {
            write_atomic(&dir.join(MODEL_FILE), bytes).await?;
        }
        let record = serde_json::to_vec_pretty(run)?;
        write_atomic(&dir.join(RUN_FILE), &record).await?;

        debug!("Logged run {} ({}) to {}", run.run_id, run.candidate, dir.display());
        Ok(run.run_id.clone())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<TrainingRun>> {
        let dir = match self.find_run_dir(run_id).await? {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let path = dir.join(RUN_FILE);
        let raw = fs::read(&path)
            .await
            .map_err(|e| io_unavailable("read", &path, e))?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn load_artifact(&self, run_id: &str) -> Result<Vec<u8>> {
        let dir = self.find_run_dir(run_id).await?.ok_or_else(|| {
            LifecycleError::Artifact(format!("run {} is not tracked", run_id))
        })?;
        let path = dir.join(MODEL_FILE);
        fs::read(&path).await.map_err(|e| {
            LifecycleError::Artifact(format!("run {} has no artifact: {}", run_id, e))
        })
    }

    async fn list_runs(&self, experiment: Option<&str>) -> Result<Vec<TrainingRun>> {
        let experiments = match experiment {
            Some(name) => {
                validate_component("experiment", name)?;
                vec![self.root.join(name)]
            }
            None => list_dirs(&self.root).await?,
        };

        let mut runs = Vec::new();
        for experiment_dir in experiments {
            for run_dir in list_dirs(&experiment_dir).await? {
                let path = run_dir.join(RUN_FILE);
                match fs::read(&path).await {
                    Ok(raw) => runs.push(serde_json::from_slice::<TrainingRun>(&raw)?),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(io_unavailable("read", &path, e)),
                }
            }
        }
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then(a.declaration_index.cmp(&b.declaration_index))
        });
        info!("Found {} tracked runs", runs.len());
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::run::fixtures::run;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_and_read_back() {
        let dir = TempDir::new().unwrap();
        let tracker = FsExperimentTracker::new(dir.path());

        let mut first = run("logistic_regression", 0, Some(0.9));
        first.experiment = "iris_initial".to_string();
        let id = tracker.log_run(&first, Some(b"{\"weights\":[]}")).await.unwrap();
        assert_eq!(id, first.run_id);

        let stored = tracker.get_run(&id).await.unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(tracker.load_artifact(&id).await.unwrap(), b"{\"weights\":[]}");
        assert!(tracker.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_runs_have_no_artifact() {
        let dir = TempDir::new().unwrap();
        let tracker = FsExperimentTracker::new(dir.path());
        let mut failed = run("svm", 2, None);
        failed.experiment = "iris_initial".to_string();
        tracker.log_run(&failed, None).await.unwrap();

        assert!(matches!(
            tracker.load_artifact(&failed.run_id).await,
            Err(LifecycleError::Artifact(_))
        ));
    }

    #[tokio::test]
    async fn test_list_runs_filters_by_experiment() {
        let dir = TempDir::new().unwrap();
        let tracker = FsExperimentTracker::new(dir.path());

        for (i, experiment) in ["iris_initial", "iris_retrain_20240101_120000"].iter().enumerate() {
            let mut r = run("random_forest", i, Some(0.9));
            r.experiment = experiment.to_string();
            tracker.log_run(&r, None).await.unwrap();
        }

        assert_eq!(tracker.list_runs(None).await.unwrap().len(), 2);
        let initial = tracker.list_runs(Some("iris_initial")).await.unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].experiment, "iris_initial");
        assert!(tracker.list_runs(Some("nothing_here")).await.unwrap().is_empty());
        assert!(tracker.list_runs(Some("../escape")).await.is_err());
    }
}

//! Component G: atomic dump/load of the workflow to
//! `.tuttle/last_workflow.<fmt>`.
//!
//! On every transition (process started, process finished, signature
//! updated, invalidation performed, preprocess completed) the workflow is
//! serialized atomically: write to a sibling temp file, fsync, rename. A
//! missing or malformed file on load is treated as "no previous workflow".

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::workflow::Workflow;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to write {path}: {source}"))]
    Write { path: String, source: std::io::Error },

    #[snafu(display("Failed to read {path}: {source}"))]
    Read { path: String, source: std::io::Error },

    #[snafu(display("Failed to rename {from} to {to}: {source}"))]
    Rename { from: String, to: String, source: std::io::Error },

    #[snafu(display("Serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Current on-disk schema version. Bumping this is a breaking change;
/// within a major version the format stays forward- and
/// backward-compatible by virtue of `#[serde(default)]` on new fields.
const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    version: u32,
    workflow: Workflow,
}

#[async_trait]
pub trait PersistenceProvider: Send + Sync + std::fmt::Debug {
    async fn load(&self) -> Result<Option<Workflow>>;
    async fn save(&self, workflow: &Workflow) -> Result<()>;
}

/// Default provider: a single JSON file under `.tuttle/`, written through
/// a sibling temp file so a crash mid-write can never leave a truncated
/// `last_workflow.json` behind.
#[derive(Debug, Clone)]
pub struct FileWorkflowPersistence {
    path: PathBuf,
}

impl FileWorkflowPersistence {
    pub fn new(tuttle_dir: impl AsRef<Path>) -> Self {
        Self {
            path: tuttle_dir.as_ref().join("last_workflow.json"),
        }
    }
}

#[async_trait]
impl PersistenceProvider for FileWorkflowPersistence {
    async fn load(&self) -> Result<Option<Workflow>> {
        let path = self.path.clone();
        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Read { path: path.display().to_string(), source: e }),
        };
        match serde_json::from_slice::<Payload>(&contents) {
            Ok(payload) => Ok(Some(payload.workflow)),
            // Malformed payload: treated the same as "no previous workflow".
            Err(_) => Ok(None),
        }
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|_| WriteSnafu { path: parent.display().to_string() })?;
        }
        let payload = Payload {
            version: PAYLOAD_VERSION,
            workflow: workflow.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&payload).context(SerializationSnafu)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).with_context(|_| WriteSnafu {
            path: dir.display().to_string(),
        })?;
        use std::io::Write as _;
        tmp.write_all(&bytes).with_context(|_| WriteSnafu {
            path: tmp.path().display().to_string(),
        })?;
        tmp.as_file().sync_all().with_context(|_| WriteSnafu {
            path: tmp.path().display().to_string(),
        })?;
        tmp.persist(&self.path).map_err(|e| Error::Rename {
            from: e.file.path().display().to_string(),
            to: self.path.display().to_string(),
            source: e.error,
        })?;
        Ok(())
    }
}

/// In-memory provider used by tests and by the `validate` subcommand,
/// which never wants to touch disk.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowPersistence {
    state: tokio::sync::Mutex<Option<Workflow>>,
}

impl InMemoryWorkflowPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryWorkflowPersistence {
    async fn load(&self) -> Result<Option<Workflow>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        *self.state.lock().await = Some(workflow.clone());
        Ok(())
    }
}

//! On-disk cache of authenticated browser state.
//!
//! One JSON file per provider under the auth directory (`.auth/<name>.json`).
//! Freshness is judged only by the file's modification time: the provider's
//! dashboard session is short-lived, so anything older than
//! [`FRESHNESS_WINDOW`] is deleted instead of reused.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::clock::{Clock, SystemClock};

/// Maximum age of a reusable session artifact. Fixed policy, not configurable.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(15 * 60);

/// A browser cookie as persisted in the session artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// Serialized browser state carried by a session artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
}

impl StorageState {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("Failed to serialize storage state")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse storage state")
    }
}

/// A persisted session and when it was written.
#[derive(Debug, Clone)]
pub struct SessionArtifact {
    pub state: Vec<u8>,
    pub last_modified: DateTime<Utc>,
}

/// Owns the session artifacts under one directory.
pub struct AuthStateStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl AuthStateStore {
    /// Store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        let safe = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.chars().any(|c| c == '/' || c == '\\' || c == '\0');
        if !safe {
            anyhow::bail!("Invalid session name {name:?}: must be a single path segment");
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Load the artifact for `name` if it exists and is still fresh.
    ///
    /// A stale artifact is deleted and reported as absent.
    pub fn load(&self, name: &str) -> Result<Option<SessionArtifact>> {
        let path = self.artifact_path(name)?;

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(session = name, "No session artifact on disk");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat session file: {path:?}"))
            }
        };

        let last_modified: DateTime<Utc> = metadata
            .modified()
            .with_context(|| format!("Failed to read mtime of session file: {path:?}"))?
            .into();
        let age = self.clock.now().signed_duration_since(last_modified);
        let window = chrono::Duration::from_std(FRESHNESS_WINDOW)
            .context("Freshness window out of range")?;

        tracing::debug!(
            session = name,
            last_modified = %last_modified,
            age_secs = age.num_seconds(),
            "Session artifact found"
        );

        if age > window {
            tracing::info!(
                session = name,
                age_minutes = age.num_minutes(),
                "Session artifact is stale; deleting"
            );
            self.invalidate(name);
            return Ok(None);
        }

        let state = std::fs::read(&path)
            .with_context(|| format!("Failed to read session file: {path:?}"))?;

        Ok(Some(SessionArtifact {
            state,
            last_modified,
        }))
    }

    /// Atomically write (or overwrite) the artifact for `name`.
    pub fn save(&self, name: &str, state: &[u8]) -> Result<()> {
        let path = self.artifact_path(name)?;

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create auth dir: {:?}", self.dir))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {:?}", self.dir))?;
        tmp.write_all(state)
            .context("Failed to write session state")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush session state")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to write session file: {path:?}"))?;

        tracing::debug!(session = name, bytes = state.len(), "Session artifact saved");
        Ok(())
    }

    /// Best-effort delete. A missing file is fine; other failures are logged
    /// and swallowed, since the next load re-checks freshness anyway.
    pub fn invalidate(&self, name: &str) {
        let path = match self.artifact_path(name) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "Refusing to invalidate session");
                return;
            }
        };

        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(session = name, "Session artifact deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(session = name, error = %e, "Could not delete session artifact")
            }
        }
    }
}

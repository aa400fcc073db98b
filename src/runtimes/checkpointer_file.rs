//! File-backed checkpointer.
//!
//! Stores one append-only JSON-lines file per session under a configured
//! base directory (`{base_dir}/{session_id}.jsonl`). Every line is a
//! [`PersistedCheckpoint`] carrying a `v` format-version field; loaders
//! reject any version other than [`PERSISTED_CHECKPOINT_VERSION`] instead
//! of guessing at a migration.
//!
//! Writes never mutate the session file in place: the full updated history
//! is serialized to `{session_id}.jsonl.tmp` and then renamed over the
//! original, so a reader never observes a partially-written file and a
//! crash mid-write leaves the previous, valid file untouched.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::runtimes::checkpointer::{Checkpoint, Checkpointer, CheckpointerError, Result};
use crate::runtimes::persistence::PersistedCheckpoint;
use crate::utils::json_ext::JsonSerializable;

/// Durable, human-inspectable checkpointer backed by one JSON-lines file
/// per session.
///
/// A single [`Mutex`] serializes all file operations across sessions. This
/// is a deliberate simplicity tradeoff for a reference implementation: it
/// rules out interleaved writes to the same file without per-session lock
/// bookkeeping, at the cost of serializing unrelated sessions' I/O.
pub struct FileCheckpointer {
    base_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileCheckpointer {
    /// Create a checkpointer rooted at `base_dir`. The directory is created
    /// lazily on first write; it does not need to exist yet.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    fn tmp_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl.tmp"))
    }

    async fn read_history(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let path = self.session_path(session_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CheckpointerError::Backend {
                    message: format!("read {}: {e}", path.display()),
                });
            }
        };

        let mut history = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let persisted = PersistedCheckpoint::from_json_str(line).map_err(|e| {
                CheckpointerError::Backend {
                    message: format!("{} line {}: {e}", path.display(), lineno + 1),
                }
            })?;
            let checkpoint = Checkpoint::try_from(persisted).map_err(|e| {
                CheckpointerError::Backend {
                    message: format!("{} line {}: {e}", path.display(), lineno + 1),
                }
            })?;
            history.push(checkpoint);
        }
        Ok(history)
    }

    async fn write_history(&self, session_id: &str, history: &[Checkpoint]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("create_dir_all {}: {e}", self.base_dir.display()),
            })?;

        let mut buf = String::new();
        for checkpoint in history {
            let persisted = PersistedCheckpoint::from(checkpoint);
            let line = persisted
                .to_json_string()
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("serialize checkpoint {}: {e}", checkpoint.id),
                })?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let tmp_path = self.tmp_path(session_id);
        tokio::fs::write(&tmp_path, buf)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("write {}: {e}", tmp_path.display()),
            })?;

        let path = self.session_path(session_id);
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!(
                    "rename {} -> {}: {e}",
                    tmp_path.display(),
                    path.display()
                ),
            })
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut history = self.read_history(&checkpoint.session_id).await?;
        let session_id = checkpoint.session_id.clone();
        history.push(checkpoint);
        self.write_history(&session_id, &history).await
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_history(session_id).await?.into_iter().last())
    }

    #[instrument(skip(self), err)]
    async fn list_sessions(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let mut sessions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => {
                return Err(CheckpointerError::Backend {
                    message: format!("read_dir {}: {e}", self.base_dir.display()),
                });
            }
        };
        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("read_dir entry: {e}"),
                })?
        {
            let file_name = entry.file_name();
            if let Some(session_id) = file_name.to_string_lossy().strip_suffix(".jsonl") {
                sessions.push(session_id.to_string());
            }
        }
        Ok(sessions)
    }

    #[instrument(skip(self), err)]
    async fn load(&self, session_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_history(session_id)
            .await?
            .into_iter()
            .find(|cp| cp.id == checkpoint_id))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let _guard = self.lock.lock().await;
        let mut history = self.read_history(session_id).await?;
        history.sort_by(|a, b| a.step.cmp(&b.step).then(a.created_at.cmp(&b.created_at)));
        Ok(history)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, session_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.session_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointerError::Backend {
                message: format!("remove {}: {e}", path.display()),
            }),
        }
    }
}

//! Per-request scratch directories.

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Prefix of every workspace directory under the temp root
pub const WORKSPACE_PREFIX: &str = "tubetape-";

/// A uniquely named directory owning all intermediate files of one request.
///
/// Dropping the workspace schedules its recursive removal after the cleanup
/// delay. Removal happens exactly once and tolerates files that are already
/// gone.
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    cleanup_delay: Duration,
    released: bool,
}

impl TempWorkspace {
    /// Create a fresh workspace under `root`
    pub async fn create(root: &Path, cleanup_delay: Duration) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;

        let path = root.join(format!("{}{}", WORKSPACE_PREFIX, Uuid::new_v4().simple()));
        tokio::fs::create_dir(&path).await?;
        tracing::debug!("Created workspace {}", path.display());

        Ok(Self {
            path,
            cleanup_delay,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh, unused file path inside the workspace
    pub fn file_path(&self, stem: &str, extension: &str) -> PathBuf {
        let id = Uuid::new_v4().simple().to_string();
        let extension = if extension.is_empty() { "bin" } else { extension };
        self.path.join(format!("{}_{}.{}", stem, &id[..12], extension))
    }

    /// Remove the workspace immediately, skipping the delay
    pub async fn remove_now(mut self) {
        self.released = true;
        remove_dir_best_effort(&self.path).await;
    }

    /// Remove workspaces left behind by earlier processes.
    ///
    /// Only directories carrying [`WORKSPACE_PREFIX`] that were last modified
    /// more than `older_than` ago are touched. Returns how many were removed.
    pub async fn sweep_stale(root: &Path, older_than: Duration) -> usize {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!("Cannot scan temp root {}: {}", root.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
                continue;
            }

            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .and_then(|modified| Utc::now().signed_duration_since(modified).to_std().ok())
                .unwrap_or_default();

            if meta.is_dir() && age >= older_than && remove_dir_best_effort(&entry.path()).await {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} stale workspace(s) from {}", removed, root.display());
        }
        removed
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        schedule_removal(self.path.clone(), self.cleanup_delay);
    }
}

fn schedule_removal(path: PathBuf, delay: Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                remove_dir_best_effort(&path).await;
            });
        }
        Err(_) => match std::fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove workspace {}: {}", path.display(), e),
        },
    }
}

/// Recursively delete a directory, ignoring one that is already gone
///
/// Returns true only when this call removed the directory.
pub async fn remove_dir_best_effort(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::debug!("Removed workspace {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to remove workspace {}: {}", path.display(), e);
            false
        }
    }
}

/// Delete a file, ignoring one that is already gone
pub async fn remove_file_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Poll until `path` disappears or `timeout` passes
#[cfg(test)]
pub(crate) async fn wait_until_removed(path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    !path.exists()
}

//! Per-session workspace directories: staging, teardown, leftovers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, SandlotError};
use crate::session::SessionId;
use crate::submission::{self, Submission};

/// Creates the workspace directory for a session under `root`.
pub(crate) async fn create(root: &Path, id: SessionId) -> Result<PathBuf> {
    let dir = root.join(id.to_string());
    fs::create_dir_all(&dir)
        .await
        .map_err(|err| SandlotError::workspace(format!("create {}: {err}", dir.display())))?;
    Ok(dir)
}

/// Writes every submitted file under the workspace, creating parent
/// directories as needed. Returns the number of files written.
pub(crate) async fn materialize(workspace: &Path, submission: &Submission) -> Result<usize> {
    let mut written = 0;
    for file in &submission.files {
        if !submission::is_safe_relative_path(&file.name) {
            return Err(SandlotError::workspace(format!(
                "refusing to write unsafe path {}",
                file.name
            )));
        }

        let dest = workspace.join(&file.name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                SandlotError::workspace(format!("create {}: {err}", parent.display()))
            })?;
        }
        fs::write(&dest, &file.content)
            .await
            .map_err(|err| SandlotError::workspace(format!("write {}: {err}", dest.display())))?;
        written += 1;
    }
    Ok(written)
}

/// Deletes a workspace tree. Best-effort; a directory that is already
/// gone is not an error and other failures only log.
pub async fn remove(workspace: &Path) {
    match fs::remove_dir_all(workspace).await {
        Ok(()) => debug!("Deleted workspace {}", workspace.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to delete workspace {}: {err}", workspace.display()),
    }
}

/// Deletes leftover workspace directories older than `max_age`.
/// Returns how many were removed.
pub fn sweep_root(root: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(err) => {
            warn!("Cannot read workspace root {}: {err}", root.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_or(true, |modified| {
                modified.elapsed().map_or(true, |age| age >= max_age)
            });
        if !old_enough {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(err) => warn!("Failed to delete {}: {err}", path.display()),
        }
    }
    removed
}

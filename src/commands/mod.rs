//! CLI command implementations.
//!
//! Each submodule implements a sandlot CLI command with pure core logic
//! separated from IO for testability.

pub mod clean;
pub mod engines;
pub mod run_cmd;
pub mod scan;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use sandlot::submission::{Submission, SubmittedFile, ToolMeta};

/// Reads the given paths into a submission bundle. A plain file keeps
/// its base name; a directory is read recursively and its files keep
/// their paths relative to it, so nested bundles stay nested.
pub(crate) fn read_submission(paths: &[PathBuf], name: Option<String>) -> Result<Submission> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_dir(path, Path::new(""), &mut files)?;
        } else {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                bail!("not a usable file name: {}", path.display());
            };
            files.push(read_file(path, file_name)?);
        }
    }
    let meta = ToolMeta {
        name: name.unwrap_or_default(),
        ..ToolMeta::default()
    };
    Ok(Submission::new(files, meta))
}

/// Walks one directory level, sorted by name so the submission order
/// (and with it entrypoint tie-breaking) is stable across platforms.
/// Dotfiles and symlinks are skipped.
fn collect_dir(dir: &Path, prefix: &Path, files: &mut Vec<SubmittedFile>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let Ok(file_name) = entry.file_name().into_string() else {
            bail!("not a usable file name: {}", entry.path().display());
        };
        if file_name.starts_with('.') {
            continue;
        }
        let relative = prefix.join(&file_name);
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        if file_type.is_dir() {
            collect_dir(&entry.path(), &relative, files)?;
        } else if file_type.is_file() {
            files.push(read_file(&entry.path(), relative.to_string_lossy())?);
        }
    }
    Ok(())
}

fn read_file(path: &Path, name: impl Into<String>) -> Result<SubmittedFile> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(SubmittedFile::new(name.into(), content))
}

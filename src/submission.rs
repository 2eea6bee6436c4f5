//! Submitted file bundles and acceptance validation.
//!
//! A `Submission` is the immutable input to the engine: an ordered list of
//! files plus free-text metadata. Validation happens once, at acceptance;
//! after that the bundle is consumed by the session that owns it.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandlotError};

/// Largest accepted single file.
pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;

/// Largest accepted bundle (sum of all file sizes).
pub const MAX_TOTAL_BYTES: usize = 20 * 1024 * 1024;

/// One file in a submission. `name` is a workspace-relative path.
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    /// Relative path the file will be materialized at.
    pub name: String,
    /// Raw file contents.
    pub content: Vec<u8>,
    /// MIME type as declared by the uploader, if any.
    pub mime: Option<String>,
}

impl SubmittedFile {
    /// Creates a file entry from raw bytes.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            mime: None,
        }
    }

    /// File size in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Contents as UTF-8 text, or `None` for binary files.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Lowercased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Free-text metadata describing the submitted tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMeta {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Category label (for example "utilities" or "games").
    #[serde(default)]
    pub category: String,
}

/// An ordered, immutable bundle of user-submitted files.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Files in upload order. Order is significant for entrypoint ties.
    pub files: Vec<SubmittedFile>,
    /// Caller-supplied metadata.
    pub meta: ToolMeta,
}

impl Submission {
    /// Creates a submission from files and metadata.
    pub fn new(files: Vec<SubmittedFile>, meta: ToolMeta) -> Self {
        Self { files, meta }
    }

    /// Looks up a file by exact name.
    pub fn file(&self, name: &str) -> Option<&SubmittedFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Total bundle size in bytes.
    pub fn total_size(&self) -> usize {
        self.files.iter().map(SubmittedFile::size).sum()
    }

    /// Validates the bundle for acceptance.
    ///
    /// Rejects empty bundles, unsafe paths (absolute, `..`, empty or
    /// backslashed components), duplicate names, and oversize files.
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(SandlotError::validation("no files submitted"));
        }

        let mut total = 0usize;
        for file in &self.files {
            if !is_safe_relative_path(&file.name) {
                return Err(SandlotError::validation(format!(
                    "unsafe file path: {}",
                    file.name
                )));
            }
            if file.size() > MAX_FILE_BYTES {
                return Err(SandlotError::validation(format!(
                    "file {} exceeds the {} byte limit",
                    file.name, MAX_FILE_BYTES
                )));
            }
            total += file.size();
        }

        if total > MAX_TOTAL_BYTES {
            return Err(SandlotError::validation(format!(
                "bundle exceeds the {MAX_TOTAL_BYTES} byte limit"
            )));
        }

        for (i, file) in self.files.iter().enumerate() {
            if self.files[..i].iter().any(|f| f.name == file.name) {
                return Err(SandlotError::validation(format!(
                    "duplicate file name: {}",
                    file.name
                )));
            }
        }

        Ok(())
    }
}

/// True when `name` stays strictly inside the workspace when joined to it.
pub(crate) fn is_safe_relative_path(name: &str) -> bool {
    if name.is_empty() || name.contains('\\') || name.contains('\0') {
        return false;
    }
    let path = Path::new(name);
    let mut saw_component = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => saw_component = true,
            _ => return false,
        }
    }
    saw_component
}

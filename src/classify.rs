//! File-set classification: ecosystem signals and entrypoint candidates.
//!
//! Pure analysis over an in-memory submission; no filesystem access.
//! A malformed manifest degrades to extension heuristics, it never fails
//! the submission.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::submission::Submission;

/// Canonical entrypoint stems, tried in order before falling back to the
/// first submitted file with the wanted extension.
const ENTRYPOINT_STEMS: [&str; 4] = ["index", "main", "app", "server"];

/// Signals extracted from a submission's file list.
///
/// Built once per submission and read by every engine's `detect`, so the
/// same profile always yields the same selection.
#[derive(Debug, Clone)]
pub struct FileProfile {
    /// File names in submission order (order breaks entrypoint ties).
    names: Vec<String>,
    /// Files per lowercased extension.
    extensions: BTreeMap<String, usize>,
    /// Parsed `package.json` signals, when present and well formed.
    node_manifest: Option<NodeManifest>,
    /// `package.json` exists but could not be parsed.
    pub manifest_malformed: bool,
    /// `requirements.txt` with at least one requirement line.
    pub python_requirements: bool,
    /// `requirements.txt` or `pyproject.toml` present.
    pub python_manifest: bool,
    /// `go.mod` present.
    pub go_manifest: bool,
}

/// The subset of `package.json` the engine cares about.
#[derive(Debug, Clone, Default)]
pub struct NodeManifest {
    /// `scripts.start` (or `scripts.serve`) command, verbatim.
    pub start_command: Option<String>,
    /// `main` field, kept only when it names a submitted file.
    pub main: Option<String>,
    /// Non-empty `dependencies` table.
    pub has_dependencies: bool,
}

impl FileProfile {
    /// Classifies a submission. Pure and infallible.
    pub fn build(submission: &Submission) -> Self {
        let names: Vec<String> = submission.files.iter().map(|f| f.name.clone()).collect();

        let mut extensions: BTreeMap<String, usize> = BTreeMap::new();
        for file in &submission.files {
            if let Some(ext) = file.extension() {
                *extensions.entry(ext).or_insert(0) += 1;
            }
        }

        let mut manifest_malformed = false;
        let node_manifest = submission.file("package.json").map(|f| {
            match serde_json::from_slice::<Value>(&f.content) {
                Ok(json) => parse_node_manifest(&json, &names),
                Err(err) => {
                    debug!("package.json did not parse, falling back to extensions: {err}");
                    manifest_malformed = true;
                    NodeManifest::default()
                }
            }
        });

        let python_requirements = submission
            .file("requirements.txt")
            .and_then(|f| f.text())
            .is_some_and(|text| {
                text.lines()
                    .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            });

        Self {
            python_manifest: submission.file("requirements.txt").is_some()
                || submission.file("pyproject.toml").is_some(),
            go_manifest: submission.file("go.mod").is_some(),
            names,
            extensions,
            node_manifest,
            manifest_malformed,
            python_requirements,
        }
    }

    /// File names in submission order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// True when any file carries the lowercased extension.
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extensions.contains_key(ext)
    }

    /// Number of files with the lowercased extension.
    pub fn extension_count(&self, ext: &str) -> usize {
        self.extensions.get(ext).copied().unwrap_or(0)
    }

    /// True when `package.json` was submitted, even if malformed.
    pub fn has_node_manifest(&self) -> bool {
        self.node_manifest.is_some()
    }

    /// Parsed `package.json` signals. `None` when absent or malformed.
    pub fn node_manifest(&self) -> Option<&NodeManifest> {
        self.node_manifest
            .as_ref()
            .filter(|_| !self.manifest_malformed)
    }

    /// True when the set contains markup files.
    pub fn has_markup(&self) -> bool {
        self.has_extension("html") || self.has_extension("htm")
    }

    /// Resolves the entrypoint for an extension: canonical stems at the
    /// bundle root first, then the first file with the extension in
    /// submission order.
    pub fn entrypoint_for(&self, ext: &str) -> Option<String> {
        for stem in ENTRYPOINT_STEMS {
            let wanted = format!("{stem}.{ext}");
            if let Some(name) = self
                .names
                .iter()
                .find(|n| n.to_lowercase() == wanted)
            {
                return Some(name.clone());
            }
        }

        self.names
            .iter()
            .find(|n| {
                std::path::Path::new(n)
                    .extension()
                    .is_some_and(|e| e.to_string_lossy().to_lowercase() == ext)
            })
            .cloned()
    }

    /// Human-readable signal summary for logs and CLI output.
    pub fn signals(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.has_node_manifest() {
            let detail = match self.node_manifest() {
                Some(m) if m.start_command.is_some() => "package.json (start script)",
                Some(_) => "package.json",
                None => "package.json (malformed)",
            };
            out.push(format!("manifest: {detail}"));
        }
        if self.python_manifest {
            out.push("manifest: python requirements".to_string());
        }
        if self.go_manifest {
            out.push("manifest: go.mod".to_string());
        }
        for (ext, count) in &self.extensions {
            out.push(format!("extension: .{ext} x{count}"));
        }
        out
    }
}

fn parse_node_manifest(json: &Value, names: &[String]) -> NodeManifest {
    let scripts = json.get("scripts");
    let start_command = scripts
        .and_then(|s| s.get("start").or_else(|| s.get("serve")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let main = json
        .get("main")
        .and_then(Value::as_str)
        .map(|m| m.trim_start_matches("./").to_string())
        .filter(|m| names.iter().any(|n| n == m));

    let has_dependencies = json
        .get("dependencies")
        .and_then(Value::as_object)
        .is_some_and(|deps| !deps.is_empty());

    NodeManifest {
        start_command,
        main,
        has_dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{SubmittedFile, ToolMeta};

    fn submission(files: &[(&str, &str)]) -> Submission {
        Submission::new(
            files
                .iter()
                .map(|(name, content)| SubmittedFile::new(*name, *content))
                .collect(),
            ToolMeta::default(),
        )
    }

    #[test]
    fn test_extension_counting() {
        let profile = FileProfile::build(&submission(&[
            ("a.js", ""),
            ("b.JS", ""),
            ("c.py", ""),
            ("README", ""),
        ]));
        assert_eq!(profile.extension_count("js"), 2);
        assert_eq!(profile.extension_count("py"), 1);
        assert!(!profile.has_extension("rb"));
    }

    #[test]
    fn test_node_manifest_with_start_script() {
        let profile = FileProfile::build(&submission(&[
            (
                "package.json",
                r#"{"scripts": {"start": "node server.js"}, "dependencies": {"express": "^4"}}"#,
            ),
            ("server.js", ""),
        ]));
        let manifest = profile.node_manifest().unwrap();
        assert_eq!(manifest.start_command.as_deref(), Some("node server.js"));
        assert!(manifest.has_dependencies);
    }

    #[test]
    fn test_serve_script_counts_as_start() {
        let profile = FileProfile::build(&submission(&[(
            "package.json",
            r#"{"scripts": {"serve": "node app.js"}}"#,
        )]));
        let manifest = profile.node_manifest().unwrap();
        assert_eq!(manifest.start_command.as_deref(), Some("node app.js"));
    }

    #[test]
    fn test_malformed_manifest_degrades() {
        let profile = FileProfile::build(&submission(&[
            ("package.json", "{not json"),
            ("app.js", ""),
        ]));
        assert!(profile.manifest_malformed);
        assert!(profile.has_node_manifest());
        assert!(profile.node_manifest().is_none());
        assert!(profile.has_extension("js"));
    }

    #[test]
    fn test_main_field_must_name_a_submitted_file() {
        let profile = FileProfile::build(&submission(&[
            ("package.json", r#"{"main": "./missing.js"}"#),
            ("index.js", ""),
        ]));
        assert!(profile.node_manifest().unwrap().main.is_none());

        let profile = FileProfile::build(&submission(&[
            ("package.json", r#"{"main": "./cli.js"}"#),
            ("cli.js", ""),
        ]));
        assert_eq!(
            profile.node_manifest().unwrap().main.as_deref(),
            Some("cli.js")
        );
    }

    #[test]
    fn test_entrypoint_canonical_order() {
        let profile = FileProfile::build(&submission(&[
            ("server.js", ""),
            ("helper.js", ""),
            ("main.js", ""),
        ]));
        // main outranks server in the canonical order
        assert_eq!(profile.entrypoint_for("js").as_deref(), Some("main.js"));
    }

    #[test]
    fn test_entrypoint_falls_back_to_first_submitted() {
        let profile = FileProfile::build(&submission(&[
            ("tool.py", ""),
            ("other.py", ""),
        ]));
        assert_eq!(profile.entrypoint_for("py").as_deref(), Some("tool.py"));
        assert_eq!(profile.entrypoint_for("rb"), None);
    }

    #[test]
    fn test_entrypoint_is_deterministic() {
        let sub = submission(&[("z.py", ""), ("app.py", ""), ("a.py", "")]);
        let first = FileProfile::build(&sub).entrypoint_for("py");
        for _ in 0..10 {
            assert_eq!(FileProfile::build(&sub).entrypoint_for("py"), first);
        }
        assert_eq!(first.as_deref(), Some("app.py"));
    }

    #[test]
    fn test_python_requirements_detection() {
        let profile = FileProfile::build(&submission(&[
            ("requirements.txt", "# just a comment\n\n"),
            ("main.py", ""),
        ]));
        assert!(profile.python_manifest);
        assert!(!profile.python_requirements);

        let profile = FileProfile::build(&submission(&[
            ("requirements.txt", "flask==3.0\n"),
            ("main.py", ""),
        ]));
        assert!(profile.python_requirements);
    }

    #[test]
    fn test_signals_summary() {
        let profile = FileProfile::build(&submission(&[
            ("package.json", r#"{"scripts": {"start": "node server.js"}}"#),
            ("server.js", ""),
        ]));
        let signals = profile.signals();
        assert!(signals.iter().any(|s| s.contains("start script")));
        assert!(signals.iter().any(|s| s.contains(".js")));
    }
}

//! Runtime engines: one capability per supported ecosystem.
//!
//! Engines are stateless descriptors. They recognize a file set, name its
//! entrypoint, and describe the install/build/run commands; the supervisor
//! owns all actual process work so every engine shares the same hardening.

mod golang;
mod node;
mod python;
mod staticsite;

pub use golang::GoEngine;
pub use node::{NodeScriptEngine, NodeWebEngine};
pub use python::PythonEngine;
pub use staticsite::StaticSiteEngine;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::classify::FileProfile;
use crate::config::Config;
use crate::error::{Result, SandlotError};

/// Broad class of a runtime engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Long-running process serving HTTP on an allocated port.
    WebService,
    /// Interpreted script run to completion.
    Script,
    /// Compiled to a binary, then run to completion.
    Compiled,
    /// Markup bundle served by a lightweight static server.
    StaticAssets,
}

impl EngineKind {
    /// Whether sessions on this engine get an ephemeral port.
    pub fn wants_port(self) -> bool {
        matches!(self, Self::WebService | Self::StaticAssets)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::WebService => "web-service",
            Self::Script => "script",
            Self::Compiled => "compiled",
            Self::StaticAssets => "static-assets",
        };
        write!(f, "{label}")
    }
}

/// How confidently an engine claims a file set. An explicit manifest
/// always outranks a bare extension match, regardless of registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchStrength {
    Extension,
    Manifest,
}

/// Provisioning step class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Install,
    Build,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Install => "install",
            Self::Build => "build",
        };
        write!(f, "{label}")
    }
}

/// One install or build command to run in the workspace.
#[derive(Debug, Clone)]
pub struct ProvisionStage {
    pub kind: StageKind,
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment beyond the restricted baseline.
    pub env: Vec<(String, String)>,
}

/// Inputs for `provision_stages`.
pub struct StageContext<'a> {
    pub workspace: &'a Path,
    pub profile: &'a FileProfile,
}

/// Inputs for `launch_plan`. `port` is set when the engine kind wants one.
pub struct LaunchContext<'a> {
    pub workspace: &'a Path,
    pub profile: &'a FileProfile,
    pub entrypoint: Option<&'a str>,
    pub port: Option<u16>,
}

/// The run command an engine wants executed.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment beyond the restricted baseline.
    pub env: Vec<(String, String)>,
}

/// A capability that recognizes and runs one class of project ecosystem.
pub trait RuntimeEngine: Send + Sync + std::fmt::Debug {
    /// Stable engine name, used in config keys and status output.
    fn name(&self) -> &'static str;

    /// Broad engine class.
    fn kind(&self) -> EngineKind;

    /// Pure match predicate over the classified file set.
    fn detect(&self, profile: &FileProfile) -> Option<MatchStrength>;

    /// Deterministic entrypoint for this file set, if one exists.
    fn entrypoint(&self, profile: &FileProfile) -> Option<String>;

    /// Install/build commands to run before launch. May be empty.
    fn provision_stages(&self, ctx: &StageContext<'_>) -> Vec<ProvisionStage>;

    /// The run command. Called once provisioning succeeded.
    fn launch_plan(&self, ctx: &LaunchContext<'_>) -> Result<LaunchPlan>;
}

/// Ordered set of engines. Position is the tie-breaker, so selection is
/// deterministic for any fixed file set.
pub struct EngineRegistry {
    engines: Vec<Arc<dyn RuntimeEngine>>,
}

impl EngineRegistry {
    /// Builds the default registry with tool paths resolved from config.
    pub fn from_config(config: &Config) -> Self {
        let node = resolve_tool(config.engines.node.path.as_deref(), "node", &[]);
        let npm = resolve_tool(None, "npm", &[]);
        let python = resolve_tool(
            config.engines.python.path.as_deref(),
            "python3",
            &["python"],
        );
        let go = resolve_tool(config.engines.go.path.as_deref(), "go", &[]);
        let server = resolve_tool(
            config.engines.static_site.path.as_deref(),
            "python3",
            &["python"],
        );

        Self::with_engines(vec![
            Arc::new(NodeWebEngine::new(node.clone(), npm.clone())),
            Arc::new(NodeScriptEngine::new(node, npm)),
            Arc::new(GoEngine::new(go)),
            Arc::new(PythonEngine::new(python)),
            Arc::new(StaticSiteEngine::new(server)),
        ])
    }

    /// Builds a registry from an explicit engine list.
    pub fn with_engines(engines: Vec<Arc<dyn RuntimeEngine>>) -> Self {
        Self { engines }
    }

    /// Registered engines in priority order.
    pub fn engines(&self) -> &[Arc<dyn RuntimeEngine>] {
        &self.engines
    }

    /// Selects the engine for a file set, or `NoEngineFound`.
    ///
    /// Highest match strength wins; among equal strengths the earliest
    /// registered engine wins. Never dependent on map iteration order.
    pub fn select(&self, profile: &FileProfile) -> Result<Arc<dyn RuntimeEngine>> {
        let mut best: Option<(MatchStrength, &Arc<dyn RuntimeEngine>)> = None;
        for engine in &self.engines {
            if let Some(strength) = engine.detect(profile) {
                debug!("Engine {} matched at {strength:?}", engine.name());
                let stronger = match best {
                    None => true,
                    Some((current, _)) => strength > current,
                };
                if stronger {
                    best = Some((strength, engine));
                }
            }
        }

        best.map(|(_, engine)| Arc::clone(engine))
            .ok_or(SandlotError::NoEngineFound)
    }
}

/// Resolves a tool binary: explicit config path first, then `PATH` lookup
/// of the name and its fallbacks, else the bare name so spawn errors stay
/// descriptive.
pub(crate) fn resolve_tool(configured: Option<&str>, name: &str, fallbacks: &[&str]) -> String {
    if let Some(path) = configured {
        return path.to_string();
    }
    for candidate in std::iter::once(name).chain(fallbacks.iter().copied()) {
        if let Ok(found) = which::which(candidate) {
            return found.to_string_lossy().into_owned();
        }
    }
    name.to_string()
}

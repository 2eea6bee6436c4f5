//! Static-asset engine: serves markup bundles over loopback HTTP.
//!
//! The fallback when nothing declared an ecosystem. Serving happens in a
//! spawned child like every other engine, so the liveness invariant and
//! the resource limits apply uniformly.

use crate::classify::FileProfile;
use crate::error::{Result, SandlotError};

use super::{
    EngineKind, LaunchContext, LaunchPlan, MatchStrength, ProvisionStage, RuntimeEngine,
    StageContext,
};

/// Serves the workspace directory with `python -m http.server`.
#[derive(Debug)]
pub struct StaticSiteEngine {
    server_path: String,
}

impl StaticSiteEngine {
    /// Creates the engine with a resolved interpreter to serve through.
    pub fn new(server_path: String) -> Self {
        Self { server_path }
    }
}

impl RuntimeEngine for StaticSiteEngine {
    fn name(&self) -> &'static str {
        "static"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::StaticAssets
    }

    fn detect(&self, profile: &FileProfile) -> Option<MatchStrength> {
        profile.has_markup().then_some(MatchStrength::Extension)
    }

    fn entrypoint(&self, profile: &FileProfile) -> Option<String> {
        profile
            .entrypoint_for("html")
            .or_else(|| profile.entrypoint_for("htm"))
    }

    fn provision_stages(&self, _ctx: &StageContext<'_>) -> Vec<ProvisionStage> {
        Vec::new()
    }

    fn launch_plan(&self, ctx: &LaunchContext<'_>) -> Result<LaunchPlan> {
        let port = ctx
            .port
            .ok_or_else(|| SandlotError::spawn_failed("static server needs a port"))?;

        Ok(LaunchPlan {
            program: self.server_path.clone(),
            args: vec![
                "-m".to_string(),
                "http.server".to_string(),
                "--bind".to_string(),
                "127.0.0.1".to_string(),
                port.to_string(),
            ],
            env: Vec::new(),
        })
    }
}

//! Go engine: compiled to a workspace-local binary, then run.

use crate::classify::FileProfile;
use crate::error::Result;

use super::{
    EngineKind, LaunchContext, LaunchPlan, MatchStrength, ProvisionStage, RuntimeEngine,
    StageContext, StageKind,
};

/// Build output path, relative to the workspace.
const OUT_BIN: &str = ".bin/app";

/// Builds a go module (or a single file) and runs the produced binary.
/// The toolchain's cache directories stay inside the workspace so the
/// build leaves nothing behind after cleanup.
#[derive(Debug)]
pub struct GoEngine {
    go_path: String,
}

impl GoEngine {
    /// Creates the engine with a resolved `go` toolchain path.
    pub fn new(go_path: String) -> Self {
        Self { go_path }
    }
}

impl RuntimeEngine for GoEngine {
    fn name(&self) -> &'static str {
        "go"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Compiled
    }

    fn detect(&self, profile: &FileProfile) -> Option<MatchStrength> {
        if profile.go_manifest {
            return Some(MatchStrength::Manifest);
        }
        if profile.has_extension("go") {
            return Some(MatchStrength::Extension);
        }
        None
    }

    fn entrypoint(&self, profile: &FileProfile) -> Option<String> {
        profile.entrypoint_for("go")
    }

    fn provision_stages(&self, ctx: &StageContext<'_>) -> Vec<ProvisionStage> {
        let mut args = vec!["build".to_string(), "-o".to_string(), OUT_BIN.to_string()];
        if ctx.profile.go_manifest {
            args.push(".".to_string());
        } else if let Some(entry) = self.entrypoint(ctx.profile) {
            args.push(entry);
        } else {
            return Vec::new();
        }

        let ws = ctx.workspace;
        vec![ProvisionStage {
            kind: StageKind::Build,
            program: self.go_path.clone(),
            args,
            env: vec![
                (
                    "GOCACHE".to_string(),
                    ws.join(".gocache").to_string_lossy().into_owned(),
                ),
                (
                    "GOPATH".to_string(),
                    ws.join(".gopath").to_string_lossy().into_owned(),
                ),
                ("CGO_ENABLED".to_string(), "0".to_string()),
            ],
        }]
    }

    fn launch_plan(&self, ctx: &LaunchContext<'_>) -> Result<LaunchPlan> {
        Ok(LaunchPlan {
            program: ctx.workspace.join(OUT_BIN).to_string_lossy().into_owned(),
            args: Vec::new(),
            env: Vec::new(),
        })
    }
}

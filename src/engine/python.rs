//! Python engine: interpreted scripts with optional pip requirements.

use crate::classify::FileProfile;
use crate::error::{Result, SandlotError};

use super::{
    EngineKind, LaunchContext, LaunchPlan, MatchStrength, ProvisionStage, RuntimeEngine,
    StageContext, StageKind,
};

/// Directory inside the workspace that vendored requirements install to.
const DEPS_DIR: &str = ".pydeps";

/// Runs a python entrypoint to completion. `requirements.txt` installs
/// into a workspace-local target directory, never the interpreter's
/// site-packages.
#[derive(Debug)]
pub struct PythonEngine {
    python_path: String,
}

impl PythonEngine {
    /// Creates the engine with a resolved interpreter path.
    pub fn new(python_path: String) -> Self {
        Self { python_path }
    }
}

impl RuntimeEngine for PythonEngine {
    fn name(&self) -> &'static str {
        "python"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Script
    }

    fn detect(&self, profile: &FileProfile) -> Option<MatchStrength> {
        if profile.python_manifest {
            return Some(MatchStrength::Manifest);
        }
        if profile.has_extension("py") {
            return Some(MatchStrength::Extension);
        }
        None
    }

    fn entrypoint(&self, profile: &FileProfile) -> Option<String> {
        profile.entrypoint_for("py")
    }

    fn provision_stages(&self, ctx: &StageContext<'_>) -> Vec<ProvisionStage> {
        if !ctx.profile.python_requirements {
            return Vec::new();
        }

        vec![ProvisionStage {
            kind: StageKind::Install,
            program: self.python_path.clone(),
            args: [
                "-m",
                "pip",
                "install",
                "--no-cache-dir",
                "--target",
                DEPS_DIR,
                "-r",
                "requirements.txt",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            env: Vec::new(),
        }]
    }

    fn launch_plan(&self, ctx: &LaunchContext<'_>) -> Result<LaunchPlan> {
        let entry = ctx
            .entrypoint
            .ok_or_else(|| SandlotError::spawn_failed("no python entrypoint"))?;

        let mut env = vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())];
        if ctx.profile.python_requirements {
            env.push((
                "PYTHONPATH".to_string(),
                ctx.workspace.join(DEPS_DIR).to_string_lossy().into_owned(),
            ));
        }

        Ok(LaunchPlan {
            program: self.python_path.clone(),
            args: vec![entry.to_string()],
            env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{Submission, SubmittedFile, ToolMeta};
    use std::path::Path;

    fn profile(files: &[(&str, &str)]) -> FileProfile {
        let sub = Submission::new(
            files
                .iter()
                .map(|(n, c)| SubmittedFile::new(*n, *c))
                .collect(),
            ToolMeta::default(),
        );
        FileProfile::build(&sub)
    }

    fn engine() -> PythonEngine {
        PythonEngine::new("/usr/bin/python3".into())
    }

    #[test]
    fn test_requirements_manifest_outranks_extension() {
        let manifest = profile(&[("requirements.txt", "requests==2.32"), ("main.py", "")]);
        assert_eq!(engine().detect(&manifest), Some(MatchStrength::Manifest));

        let loose = profile(&[("main.py", "")]);
        assert_eq!(engine().detect(&loose), Some(MatchStrength::Extension));

        assert_eq!(engine().detect(&profile(&[("main.go", "")])), None);
    }

    #[test]
    fn test_install_stage_targets_workspace_deps() {
        let p = profile(&[("requirements.txt", "flask==3.0"), ("app.py", "")]);
        let stages = engine().provision_stages(&StageContext {
            workspace: Path::new("/tmp/ws"),
            profile: &p,
        });
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].kind, StageKind::Install);
        assert!(stages[0].args.contains(&"--target".to_string()));
        assert!(stages[0].args.contains(&DEPS_DIR.to_string()));
    }

    #[test]
    fn test_empty_requirements_skip_install() {
        let p = profile(&[("requirements.txt", "# nothing\n"), ("app.py", "")]);
        let stages = engine().provision_stages(&StageContext {
            workspace: Path::new("/tmp/ws"),
            profile: &p,
        });
        assert!(stages.is_empty());
    }

    #[test]
    fn test_launch_is_unbuffered() {
        let p = profile(&[("main.py", "print('hi')")]);
        let plan = engine()
            .launch_plan(&LaunchContext {
                workspace: Path::new("/tmp/ws"),
                profile: &p,
                entrypoint: Some("main.py"),
                port: None,
            })
            .unwrap();
        assert_eq!(plan.program, "/usr/bin/python3");
        assert_eq!(plan.args, vec!["main.py"]);
        assert!(plan
            .env
            .iter()
            .any(|(k, v)| k == "PYTHONUNBUFFERED" && v == "1"));
    }

    #[test]
    fn test_launch_adds_pythonpath_for_vendored_deps() {
        let p = profile(&[("requirements.txt", "flask==3.0"), ("app.py", "")]);
        let plan = engine()
            .launch_plan(&LaunchContext {
                workspace: Path::new("/tmp/ws"),
                profile: &p,
                entrypoint: Some("app.py"),
                port: None,
            })
            .unwrap();
        let pythonpath = plan
            .env
            .iter()
            .find(|(k, _)| k == "PYTHONPATH")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(pythonpath, "/tmp/ws/.pydeps");
    }
}

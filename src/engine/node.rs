//! Node.js engines: the manifest-driven web variant and the script runner.

use tracing::debug;

use crate::classify::FileProfile;
use crate::error::{Result, SandlotError};

use super::{
    EngineKind, LaunchContext, LaunchPlan, MatchStrength, ProvisionStage, RuntimeEngine,
    StageContext, StageKind,
};

/// Characters that force a start command through `sh -c`.
const SHELL_METACHARS: [char; 7] = ['&', '|', ';', '<', '>', '$', '`'];

/// Long-running web process declared by a `package.json` start script.
#[derive(Debug)]
pub struct NodeWebEngine {
    node_path: String,
    npm_path: String,
}

impl NodeWebEngine {
    /// Creates the engine with resolved `node` and `npm` paths.
    pub fn new(node_path: String, npm_path: String) -> Self {
        Self {
            node_path,
            npm_path,
        }
    }
}

impl RuntimeEngine for NodeWebEngine {
    fn name(&self) -> &'static str {
        "node-web"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::WebService
    }

    fn detect(&self, profile: &FileProfile) -> Option<MatchStrength> {
        profile
            .node_manifest()
            .filter(|m| m.start_command.is_some())
            .map(|_| MatchStrength::Manifest)
    }

    fn entrypoint(&self, profile: &FileProfile) -> Option<String> {
        node_entrypoint(profile)
    }

    fn provision_stages(&self, ctx: &StageContext<'_>) -> Vec<ProvisionStage> {
        install_stage_if_needed(ctx.profile, &self.npm_path)
    }

    fn launch_plan(&self, ctx: &LaunchContext<'_>) -> Result<LaunchPlan> {
        let command = ctx
            .profile
            .node_manifest()
            .and_then(|m| m.start_command.clone())
            .ok_or_else(|| SandlotError::spawn_failed("manifest has no start command"))?;

        Ok(plan_for_command(&command, &self.node_path, &self.npm_path))
    }
}

/// Script runner for node bundles without a start script, or loose
/// JavaScript files with no manifest at all.
#[derive(Debug)]
pub struct NodeScriptEngine {
    node_path: String,
    npm_path: String,
}

impl NodeScriptEngine {
    /// Creates the engine with resolved `node` and `npm` paths.
    pub fn new(node_path: String, npm_path: String) -> Self {
        Self {
            node_path,
            npm_path,
        }
    }
}

impl RuntimeEngine for NodeScriptEngine {
    fn name(&self) -> &'static str {
        "node"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Script
    }

    fn detect(&self, profile: &FileProfile) -> Option<MatchStrength> {
        if profile.node_manifest().is_some() {
            return Some(MatchStrength::Manifest);
        }
        if ["js", "mjs", "cjs"].iter().any(|e| profile.has_extension(e)) {
            return Some(MatchStrength::Extension);
        }
        None
    }

    fn entrypoint(&self, profile: &FileProfile) -> Option<String> {
        node_entrypoint(profile)
    }

    fn provision_stages(&self, ctx: &StageContext<'_>) -> Vec<ProvisionStage> {
        install_stage_if_needed(ctx.profile, &self.npm_path)
    }

    fn launch_plan(&self, ctx: &LaunchContext<'_>) -> Result<LaunchPlan> {
        let entry = ctx
            .entrypoint
            .ok_or_else(|| SandlotError::spawn_failed("no JavaScript entrypoint"))?;

        Ok(LaunchPlan {
            program: self.node_path.clone(),
            args: vec![entry.to_string()],
            env: Vec::new(),
        })
    }
}

fn node_entrypoint(profile: &FileProfile) -> Option<String> {
    profile
        .node_manifest()
        .and_then(|m| m.main.clone())
        .or_else(|| profile.entrypoint_for("js"))
        .or_else(|| profile.entrypoint_for("mjs"))
        .or_else(|| profile.entrypoint_for("cjs"))
}

fn install_stage_if_needed(profile: &FileProfile, npm_path: &str) -> Vec<ProvisionStage> {
    let needs_install = profile
        .node_manifest()
        .is_some_and(|m| m.has_dependencies);
    if !needs_install {
        return Vec::new();
    }

    vec![ProvisionStage {
        kind: StageKind::Install,
        program: npm_path.to_string(),
        args: ["install", "--omit=dev", "--no-audit", "--no-fund"]
            .into_iter()
            .map(String::from)
            .collect(),
        env: Vec::new(),
    }]
}

/// Turns a manifest start command into a launch plan.
///
/// Simple commands run directly with `node`/`npm` mapped to the resolved
/// paths; anything with shell metacharacters or env-var prefixes keeps
/// its shell semantics via `sh -c`.
fn plan_for_command(command: &str, node_path: &str, npm_path: &str) -> LaunchPlan {
    let needs_shell = command.contains(&SHELL_METACHARS[..]);

    if !needs_shell {
        if let Ok(argv) = shell_words::split(command) {
            if let Some((first, rest)) = argv.split_first() {
                if !is_env_assignment(first) {
                    let program = match first.as_str() {
                        "node" => node_path.to_string(),
                        "npm" => npm_path.to_string(),
                        other => other.to_string(),
                    };
                    return LaunchPlan {
                        program,
                        args: rest.to_vec(),
                        env: Vec::new(),
                    };
                }
            }
        }
    }

    debug!("Start command needs a shell: {command}");
    LaunchPlan {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), command.to_string()],
        env: Vec::new(),
    }
}

fn is_env_assignment(token: &str) -> bool {
    let Some((name, _)) = token.split_once('=') else {
        return false;
    };
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{Submission, SubmittedFile, ToolMeta};

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

    fn web() -> NodeWebEngine {
        NodeWebEngine::new("/usr/bin/node".into(), "/usr/bin/npm".into())
    }

    fn script() -> NodeScriptEngine {
        NodeScriptEngine::new("/usr/bin/node".into(), "/usr/bin/npm".into())
    }

    #[test]
    fn test_simple_start_command_runs_directly() {
        let plan = plan_for_command("node server.js", "/usr/bin/node", "/usr/bin/npm");
        assert_eq!(plan.program, "/usr/bin/node");
        assert_eq!(plan.args, vec!["server.js"]);
    }

    #[test]
    fn test_npm_start_command_maps_npm_path() {
        let plan = plan_for_command("npm run serve", "/usr/bin/node", "/usr/bin/npm");
        assert_eq!(plan.program, "/usr/bin/npm");
        assert_eq!(plan.args, vec!["run", "serve"]);
    }

    #[test]
    fn test_metacharacters_fall_back_to_shell() {
        let plan = plan_for_command(
            "node build.js && node server.js",
            "/usr/bin/node",
            "/usr/bin/npm",
        );
        assert_eq!(plan.program, "/bin/sh");
        assert_eq!(plan.args[0], "-c");
    }

    #[test]
    fn test_env_prefix_falls_back_to_shell() {
        let plan = plan_for_command("DEBUG=1 node app.js", "/usr/bin/node", "/usr/bin/npm");
        assert_eq!(plan.program, "/bin/sh");
    }

    #[test]
    fn test_web_detect_requires_start_script() {
        let with_start = profile(&[(
            "package.json",
            r#"{"scripts": {"start": "node server.js"}}"#,
        )]);
        assert_eq!(web().detect(&with_start), Some(MatchStrength::Manifest));

        let without = profile(&[("package.json", r#"{"name": "tool"}"#)]);
        assert_eq!(web().detect(&without), None);
        assert_eq!(script().detect(&without), Some(MatchStrength::Manifest));
    }

    #[test]
    fn test_loose_js_detected_at_extension_strength() {
        let p = profile(&[("widget.js", "")]);
        assert_eq!(script().detect(&p), Some(MatchStrength::Extension));
    }

    #[test]
    fn test_install_stage_only_with_dependencies() {
        let with_deps = profile(&[(
            "package.json",
            r#"{"dependencies": {"express": "^4"}}"#,
        )]);
        let ws = std::path::Path::new("/tmp/ws");
        let stages = script().provision_stages(&StageContext {
            workspace: ws,
            profile: &with_deps,
        });
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].kind, StageKind::Install);
        assert_eq!(stages[0].args[0], "install");

        let no_deps = profile(&[("package.json", r#"{"dependencies": {}}"#)]);
        let stages = script().provision_stages(&StageContext {
            workspace: ws,
            profile: &no_deps,
        });
        assert!(stages.is_empty());
    }

    #[test]
    fn test_entrypoint_prefers_manifest_main() {
        let p = profile(&[
            ("package.json", r#"{"main": "cli.js"}"#),
            ("index.js", ""),
            ("cli.js", ""),
        ]);
        assert_eq!(script().entrypoint(&p).as_deref(), Some("cli.js"));
    }

    #[test]
    fn test_script_launch_uses_entrypoint() {
        let p = profile(&[("tool.js", "")]);
        let plan = script()
            .launch_plan(&LaunchContext {
                workspace: std::path::Path::new("/tmp/ws"),
                profile: &p,
                entrypoint: Some("tool.js"),
                port: None,
            })
            .unwrap();
        assert_eq!(plan.program, "/usr/bin/node");
        assert_eq!(plan.args, vec!["tool.js"]);
    }

    #[test]
    fn test_web_launch_requires_start_command() {
        let p = profile(&[("package.json", r#"{"name": "x"}"#)]);
        let err = web()
            .launch_plan(&LaunchContext {
                workspace: std::path::Path::new("/tmp/ws"),
                profile: &p,
                entrypoint: None,
                port: Some(3000),
            })
            .unwrap_err();
        assert!(err.to_string().contains("start command"));
    }
}

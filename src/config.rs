//! Configuration loading and limit resolution.
//!
//! Settings come from `sandlot.toml` in the working directory; every
//! field has a default, so a missing file yields a fully usable config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "sandlot.toml";

/// Engine configuration, loaded from `sandlot.toml` with full defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
}

/// Global execution limits. Per-engine overrides in `[engines.*]` win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum seconds for a dependency install step.
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    /// Maximum seconds for a build step.
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Maximum wall-clock seconds for the run itself.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Resident-memory ceiling per session, in megabytes.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    /// Cumulative CPU-seconds ceiling per session. Unset = no CPU ceiling.
    #[serde(default)]
    pub max_cpu_secs: Option<u64>,

    /// Sessions allowed in provisioning/starting/running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// What a start request does once the cap is reached.
    #[serde(default)]
    pub when_full: OverflowPolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            install_timeout_secs: default_install_timeout(),
            build_timeout_secs: default_build_timeout(),
            run_timeout_secs: default_run_timeout(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_secs: None,
            max_concurrent: default_max_concurrent(),
            when_full: OverflowPolicy::default(),
        }
    }
}

/// Behavior of `start_session` when the concurrency cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for a slot to free up.
    #[default]
    Queue,
    /// Fail immediately with a capacity error.
    Reject,
}

/// Session bookkeeping: retention, expiry, background intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Seconds of inactivity before the reaper expires a session.
    #[serde(default = "default_idle_expiry")]
    pub idle_expiry_secs: u64,

    /// Log entries retained per session (oldest dropped beyond this).
    #[serde(default = "default_log_cap")]
    pub log_cap_entries: usize,

    /// Root directory for per-session workspaces.
    /// Defaults to `<cache-dir>/sandlot/workspaces`.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Milliseconds between resource-monitor samples.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// Seconds between reaper sweeps.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_expiry_secs: default_idle_expiry(),
            log_cap_entries: default_log_cap(),
            workspace_root: None,
            monitor_interval_ms: default_monitor_interval(),
            reap_interval_secs: default_reap_interval(),
        }
    }
}

/// Security-gate thresholds and network allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Risk score at or above which a submission is rejected.
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u8,

    /// Risk score at or above which a submission is flagged for audit.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u8,

    /// Hosts that outbound URLs may reference without being flagged.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            block_threshold: default_block_threshold(),
            warn_threshold: default_warn_threshold(),
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

/// Audit event delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Webhook receiving lifecycle events. Unset = log-only.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Per-ecosystem tool paths and limit overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default)]
    pub node: EngineOverride,
    #[serde(default)]
    pub python: EngineOverride,
    #[serde(default)]
    pub go: EngineOverride,
    #[serde(default, rename = "static")]
    pub static_site: EngineOverride,
}

impl EnginesConfig {
    /// Override table for an engine name ("node-web" shares "node").
    pub fn for_engine(&self, name: &str) -> Option<&EngineOverride> {
        match name {
            "node" | "node-web" => Some(&self.node),
            "python" => Some(&self.python),
            "go" => Some(&self.go),
            "static" => Some(&self.static_site),
            _ => None,
        }
    }
}

/// Optional per-engine settings; unset fields fall back to `[limits]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOverride {
    /// Explicit interpreter/toolchain binary path.
    #[serde(default)]
    pub path: Option<String>,

    /// Memory ceiling override, in megabytes.
    #[serde(default)]
    pub max_memory_mb: Option<u64>,

    /// Run timeout override, in seconds.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Install timeout override, in seconds.
    #[serde(default)]
    pub install_timeout_secs: Option<u64>,

    /// Build timeout override, in seconds.
    #[serde(default)]
    pub build_timeout_secs: Option<u64>,
}

/// Limits resolved for one session after applying engine overrides.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveLimits {
    pub install_timeout: Duration,
    pub build_timeout: Duration,
    pub run_timeout: Duration,
    pub max_memory_bytes: u64,
    pub max_cpu: Option<Duration>,
}

// Default value functions
fn default_install_timeout() -> u64 {
    120
}

fn default_build_timeout() -> u64 {
    120
}

fn default_run_timeout() -> u64 {
    300
}

fn default_max_memory_mb() -> u64 {
    512
}

fn default_max_concurrent() -> usize {
    4
}

fn default_idle_expiry() -> u64 {
    600
}

fn default_log_cap() -> usize {
    1000
}

fn default_monitor_interval() -> u64 {
    500
}

fn default_reap_interval() -> u64 {
    30
}

fn default_block_threshold() -> u8 {
    70
}

fn default_warn_threshold() -> u8 {
    40
}

fn default_allowed_hosts() -> Vec<String> {
    [
        "localhost",
        "127.0.0.1",
        "cdn.jsdelivr.net",
        "cdnjs.cloudflare.com",
        "unpkg.com",
        "fonts.googleapis.com",
        "fonts.gstatic.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
    /// Load configuration from `sandlot.toml` in `dir`, using defaults if
    /// the file does not exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::from_file(&config_path)
    }

    /// Load configuration from an explicit file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Resolve the limits that apply to a session on the named engine.
    pub fn limits_for(&self, engine: &str) -> EffectiveLimits {
        let over = self.engines.for_engine(engine);
        let pick = |f: fn(&EngineOverride) -> Option<u64>, global: u64| {
            over.and_then(f).unwrap_or(global)
        };

        EffectiveLimits {
            install_timeout: Duration::from_secs(pick(
                |o| o.install_timeout_secs,
                self.limits.install_timeout_secs,
            )),
            build_timeout: Duration::from_secs(pick(
                |o| o.build_timeout_secs,
                self.limits.build_timeout_secs,
            )),
            run_timeout: Duration::from_secs(pick(
                |o| o.run_timeout_secs,
                self.limits.run_timeout_secs,
            )),
            max_memory_bytes: pick(|o| o.max_memory_mb, self.limits.max_memory_mb) * 1024 * 1024,
            max_cpu: self.limits.max_cpu_secs.map(Duration::from_secs),
        }
    }

    /// Directory that holds per-session workspaces.
    pub fn workspace_root(&self) -> PathBuf {
        self.sessions.workspace_root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("sandlot")
                .join("workspaces")
        })
    }

    /// Interval between resource-monitor samples.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.sessions.monitor_interval_ms.max(50))
    }

    /// Interval between reaper sweeps.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.reap_interval_secs.max(1))
    }

    /// Inactivity window after which sessions are expired.
    pub fn idle_expiry(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_expiry_secs)
    }
}

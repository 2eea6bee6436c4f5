//! Restricted process spawning and process-tree termination.
//!
//! Children run with a cleared environment, the workspace as both cwd
//! and `HOME`, no stdin, and their own process group so the whole tree
//! can be signaled at once.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

/// Variables forwarded from the engine's own environment.
const INHERITED_VARS: [&str; 2] = ["PATH", "LANG"];

/// Specification for one confined child process.
pub(crate) struct SpawnSpec<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub workspace: &'a Path,
    /// Engine-specific additions on top of the restricted baseline.
    pub env: &'a [(String, String)],
    pub port: Option<u16>,
}

/// Spawns a child under the restricted baseline with piped output.
pub(crate) fn spawn_confined(spec: &SpawnSpec<'_>) -> std::io::Result<Child> {
    let mut cmd = Command::new(spec.program);
    cmd.args(spec.args);
    cmd.current_dir(spec.workspace);

    cmd.env_clear();
    for var in INHERITED_VARS {
        if let Ok(value) = std::env::var(var) {
            cmd.env(var, value);
        }
    }
    cmd.env("HOME", spec.workspace);
    if let Some(port) = spec.port {
        cmd.env("PORT", port.to_string());
    }
    for (key, value) in spec.env {
        cmd.env(key, value);
    }

    // Own process group, so kill_tree reaches every descendant.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    cmd.spawn()
}

/// SIGKILLs the process group led by `pid`. A group that is already gone
/// is not an error; termination must be idempotent.
pub(crate) fn kill_tree(pid: u32) {
    // killpg(0) would signal our own group.
    if pid == 0 {
        return;
    }
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => debug!("Killed process group {pid}"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => debug!("killpg({pid}) failed: {err}"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Binds an ephemeral loopback port and releases it for the child to
/// claim. The listener is dropped before the port number is handed out.
pub(crate) fn allocate_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

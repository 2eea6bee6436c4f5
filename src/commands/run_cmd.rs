//! Run a tool bundle in a sandboxed session.
//!
//! Creates a session, starts it, and follows it to a terminal state.
//! Web tools are served until Ctrl-C or the run time limit. Formatting
//! is pure; IO happens only at the top level.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use sandlot::config::Config;
use sandlot::manager::{SessionManager, SessionTicket};
use sandlot::session::{LogEntry, LogStream, SessionId, SessionState, SessionStatus};
use sandlot::workspace;

use super::read_submission;

/// How often the follower polls session status.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Options for the `run` command.
pub struct RunOptions {
    /// Display name for the tool.
    pub name: Option<String>,
    /// Explicit config file instead of working-directory discovery.
    pub config: Option<PathBuf>,
    /// Run time limit override, in seconds.
    pub timeout: Option<u64>,
    /// Keep the session workspace after the run.
    pub keep: bool,
    /// Print the final status as JSON.
    pub json: bool,
}

/// Format the session ticket banner.
pub fn format_ticket(ticket: &SessionTicket) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Sandlot Session".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(
        &mut out,
        "  Session:    {}",
        ticket.session_id.to_string().cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Engine:     {}", ticket.engine.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Entrypoint: {}",
        ticket.entrypoint.as_deref().unwrap_or("none").cyan()
    )
    .unwrap();
    let risk = if ticket.flagged {
        format!("{} (flagged)", ticket.risk.score).yellow().to_string()
    } else {
        ticket.risk.score.to_string().green().to_string()
    };
    writeln!(&mut out, "  Risk:       {risk}").unwrap();
    out
}

/// Format captured log entries, one line each.
pub fn format_log(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let line = match entry.stream {
            LogStream::Stdout => format!("  {}", entry.text),
            LogStream::Stderr => format!("  {}", entry.text.red()),
            LogStream::System => format!("  {}", entry.text.yellow().dimmed()),
        };
        writeln!(&mut out, "{line}").unwrap();
    }
    out
}

/// Format the terminal status summary.
pub fn format_status(status: &SessionStatus) -> String {
    let mut out = String::new();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    let state = match status.state {
        SessionState::Completed => status.state.to_string().green().bold(),
        SessionState::Failed | SessionState::Error => status.state.to_string().red().bold(),
        _ => status.state.to_string().yellow(),
    };
    writeln!(&mut out, "  State:      {state}").unwrap();
    if let Some(code) = status.exit_code {
        writeln!(&mut out, "  Exit code:  {}", code.to_string().cyan()).unwrap();
    }
    if let Some(resources) = status.resources {
        writeln!(
            &mut out,
            "  Peak RSS:   {}",
            format!("{} MiB", resources.peak_rss_bytes / (1024 * 1024)).cyan()
        )
        .unwrap();
    }
    if status.log_dropped > 0 {
        writeln!(
            &mut out,
            "  {}",
            format!("({} earlier log entries dropped)", status.log_dropped).dimmed()
        )
        .unwrap();
    }
    out
}

/// Poll until the session reaches a terminal state. Ctrl-C stops the
/// session instead of abandoning it.
async fn follow(manager: &SessionManager, id: SessionId, quiet: bool) -> Result<SessionStatus> {
    let mut announced = false;
    loop {
        let status = manager.session_status(id).await?;
        if status.state.is_terminal() {
            return Ok(status);
        }
        if !announced && !quiet && status.state == SessionState::Running {
            if let Some(port) = status.port {
                println!(
                    "  Serving on {}",
                    format!("http://127.0.0.1:{port}").green().bold()
                );
                println!("  Press Ctrl-C to stop");
            }
            announced = true;
        }
        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                return Ok(manager.stop_session(id).await?);
            }
        }
    }
}

/// Entry point: runs a bundle end to end.
pub async fn run(files: Vec<PathBuf>, opts: RunOptions) -> Result<()> {
    let mut config = match opts.config {
        Some(ref path) => Config::from_file(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)?
        }
    };
    if let Some(secs) = opts.timeout {
        config.limits.run_timeout_secs = secs;
    }
    let submission = read_submission(&files, opts.name)?;

    let manager = SessionManager::new(config);
    manager.start_background().await;

    let ticket = manager.create_session(submission).await?;
    if !opts.json {
        print!("{}", format_ticket(&ticket));
    }
    manager.start_session(ticket.session_id).await?;

    let status = follow(&manager, ticket.session_id, opts.json).await?;
    manager.shutdown().await;

    let dir = manager
        .config()
        .workspace_root()
        .join(ticket.session_id.to_string());
    if opts.keep {
        if !opts.json {
            println!("  Workspace kept at {}", dir.display().to_string().cyan());
        }
    } else {
        workspace::remove(&dir).await;
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_log(&status.log_tail));
        print!("{}", format_status(&status));
    }

    match status.state {
        SessionState::Failed => bail!(
            "tool exited with status {}",
            status
                .exit_code
                .map_or_else(|| "unknown".to_string(), |c| c.to_string())
        ),
        SessionState::Error => bail!("session failed before launch; see the log above"),
        _ => Ok(()),
    }
}

//! Remove leftover session workspaces.
//!
//! Age selection and formatting are pure. IO happens only at the top level.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sandlot::config::Config;
use sandlot::workspace;

/// Workspaces untouched for this long are considered abandoned.
const STALE_AFTER: Duration = Duration::from_secs(3600);

/// Age cutoff for the sweep. `--older-than 0` removes everything.
pub fn max_age(older_than_hours: Option<u64>) -> Duration {
    match older_than_hours {
        Some(hours) => Duration::from_secs(hours * 3600),
        None => STALE_AFTER,
    }
}

/// Format the sweep results as a displayable string
pub fn format_results(removed: usize, root: &Path) -> String {
    let mut out = String::new();
    if removed == 0 {
        writeln!(
            &mut out,
            "\n{} No stale workspaces under {}.",
            "ℹ".blue(),
            root.display().to_string().dimmed()
        )
        .unwrap();
    } else {
        writeln!(
            &mut out,
            "\n{} Removed {} workspace{} under {}.",
            "✓".green(),
            removed,
            if removed == 1 { "" } else { "s" },
            root.display().to_string().dimmed()
        )
        .unwrap();
    }
    out
}

/// Entry point: sweeps the given root, or the configured one.
pub async fn run(workspace_root: Option<PathBuf>, older_than_hours: Option<u64>) -> Result<()> {
    let root = match workspace_root {
        Some(root) => root,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)
                .context("Failed to load configuration")?
                .workspace_root()
        }
    };

    let removed = workspace::sweep_root(&root, max_age(older_than_hours));

    print!("{}", format_results(removed, &root));
    Ok(())
}

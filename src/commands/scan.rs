//! Score a tool bundle against the security rules without running it.
//!
//! Useful as a pre-submission check; exits nonzero when the bundle
//! would be blocked so scripts can gate on it.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::path::PathBuf;

use sandlot::config::Config;
use sandlot::security::{RiskAssessment, SecurityGate};

use super::read_submission;

/// Where an assessment lands under the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Below the warn threshold.
    Clear,
    /// Admitted, but marked for audit.
    Flagged,
    /// Rejected outright.
    Blocked,
}

/// Classify an assessment against the thresholds.
pub fn verdict(assessment: &RiskAssessment, warn: u8, block: u8) -> Verdict {
    if assessment.exceeds(block) {
        Verdict::Blocked
    } else if assessment.exceeds(warn) {
        Verdict::Flagged
    } else {
        Verdict::Clear
    }
}

/// Format the assessment for display.
pub fn format_assessment(assessment: &RiskAssessment, verdict: Verdict) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Security Scan".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    let label = match verdict {
        Verdict::Clear => "clear".green().bold(),
        Verdict::Flagged => "flagged".yellow().bold(),
        Verdict::Blocked => "blocked".red().bold(),
    };
    writeln!(&mut out, "  Score:      {} ({label})", assessment.score).unwrap();

    if !assessment.findings.is_empty() {
        writeln!(&mut out, "  Findings:").unwrap();
        for finding in &assessment.findings {
            writeln!(
                &mut out,
                "    {:<8} {:<20} {}",
                finding.severity.to_string().red(),
                finding.pattern,
                finding.file.dimmed()
            )
            .unwrap();
        }
    }
    if !assessment.recommendations.is_empty() {
        writeln!(&mut out, "  Recommendations:").unwrap();
        for line in &assessment.recommendations {
            writeln!(&mut out, "    {} {line}", "→".cyan()).unwrap();
        }
    }
    out
}

/// Entry point: scans files and prints the assessment.
pub async fn run(files: Vec<PathBuf>, json: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;
    let gate = SecurityGate::new(&config.security);

    let submission = read_submission(&files, None)?;
    submission.validate()?;
    let assessment = gate.scan(&submission);
    let verdict = verdict(
        &assessment,
        config.security.warn_threshold,
        config.security.block_threshold,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
    } else {
        print!("{}", format_assessment(&assessment, verdict));
    }

    if verdict == Verdict::Blocked {
        bail!(
            "submission would be blocked (risk {} >= {})",
            assessment.score,
            config.security.block_threshold
        );
    }
    Ok(())
}

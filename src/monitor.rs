//! Resource monitor: periodic sampling and limit enforcement.
//!
//! Every tick the monitor samples the process group of each live session
//! from `/proc`, refreshes the session's resource snapshot, and kills the
//! tree when memory, CPU, or wall-clock limits are exceeded. Sampling by
//! process group matches the scope of `kill_tree`, so what gets measured
//! is exactly what gets killed. On platforms without `/proc` only the
//! wall-clock check runs.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, EffectiveLimits};
use crate::error::SandlotError;
use crate::events::{AuditEvent, Auditor};
use crate::manager::SessionMap;
use crate::process;
use crate::session::{LogStream, ResourceSnapshot, Session, SessionState};

/// Kernel `USER_HZ`; fixed at 100 on supported platforms.
#[cfg(target_os = "linux")]
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Aggregate usage of one session's process group.
#[derive(Debug, Clone, Copy)]
struct TreeUsage {
    rss_bytes: u64,
    cpu_secs: f64,
}

/// Runs the monitor loop until `shutdown` fires.
pub(crate) async fn run(
    sessions: SessionMap,
    config: Arc<Config>,
    auditor: Auditor,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.monitor_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => poll_once(&sessions, &config, &auditor).await,
            () = shutdown.cancelled() => break,
        }
    }
    debug!("Resource monitor stopped");
}

/// Samples every live session once.
async fn poll_once(sessions: &SessionMap, config: &Config, auditor: &Auditor) {
    let handles: Vec<Arc<Mutex<Session>>> = sessions.lock().await.values().cloned().collect();
    for handle in handles {
        inspect(&handle, config, auditor).await;
    }
}

/// Samples one session's tree and enforces its limits.
async fn inspect(handle: &Arc<Mutex<Session>>, config: &Config, auditor: &Auditor) {
    let (id, pid, cause) = {
        let mut sess = handle.lock().await;
        let Some(process) = sess.process() else {
            return;
        };
        let limits = config.limits_for(sess.engine.name());
        let usage = sample_tree(process.pid);

        if let Some(usage) = usage {
            let peak = sess
                .resources
                .map_or(usage.rss_bytes, |r| r.peak_rss_bytes.max(usage.rss_bytes));
            sess.resources = Some(ResourceSnapshot {
                rss_bytes: usage.rss_bytes,
                peak_rss_bytes: peak,
                cpu_secs: usage.cpu_secs,
                sampled_at: Utc::now(),
            });
        }

        let Some(cause) = violation(&sess, usage.as_ref(), &limits) else {
            return;
        };
        let pid = process.pid;
        if !sess.transition(SessionState::Stopped) {
            return;
        }
        sess.record(
            LogStream::System,
            SandlotError::resource_limit(&cause).to_string(),
        );
        sess.cancel.cancel();
        (sess.id, pid, cause)
    };

    process::kill_tree(pid);
    warn!("Session {id} killed: {cause}");
    auditor
        .emit(AuditEvent::execution_end(id, SessionState::Stopped, None))
        .await;
}

/// Returns the first exceeded limit, described for the session log.
fn violation(
    session: &Session,
    usage: Option<&TreeUsage>,
    limits: &EffectiveLimits,
) -> Option<String> {
    if let Some(usage) = usage {
        if usage.rss_bytes > limits.max_memory_bytes {
            return Some(format!(
                "memory use {} MiB exceeded the {} MiB limit",
                usage.rss_bytes / (1024 * 1024),
                limits.max_memory_bytes / (1024 * 1024),
            ));
        }
        if let Some(cap) = limits.max_cpu {
            if usage.cpu_secs > cap.as_secs_f64() {
                return Some(format!(
                    "cpu time {:.1}s exceeded the {}s limit",
                    usage.cpu_secs,
                    cap.as_secs(),
                ));
            }
        }
    }

    // Wall-clock backstop in case the owning task stalled.
    if let Some(started) = session.started_at {
        let elapsed = Utc::now()
            .signed_duration_since(started)
            .to_std()
            .unwrap_or_default();
        if elapsed > limits.run_timeout {
            return Some(format!(
                "wall clock exceeded the {}s run limit",
                limits.run_timeout.as_secs()
            ));
        }
    }

    None
}

/// Sums RSS and CPU time over every `/proc` entry in the given process
/// group. `None` when the group has no visible members.
#[cfg(target_os = "linux")]
#[allow(clippy::cast_precision_loss)]
fn sample_tree(group: u32) -> Option<TreeUsage> {
    let Ok(group) = i32::try_from(group) else {
        return None;
    };
    let entries = std::fs::read_dir("/proc").ok()?;

    let mut rss_bytes = 0u64;
    let mut ticks = 0u64;
    let mut seen = false;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid_str) = name.to_str() else {
            continue;
        };
        if !pid_str.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        let Some(fields) = parse_stat(&stat) else {
            continue;
        };
        if fields.pgrp != group {
            continue;
        }
        seen = true;
        ticks += fields.utime + fields.stime;
        if let Ok(status) = std::fs::read_to_string(entry.path().join("status")) {
            rss_bytes += parse_vm_rss(&status).unwrap_or(0);
        }
    }

    seen.then(|| TreeUsage {
        rss_bytes,
        cpu_secs: ticks as f64 / CLOCK_TICKS_PER_SEC,
    })
}

#[cfg(not(target_os = "linux"))]
fn sample_tree(_group: u32) -> Option<TreeUsage> {
    None
}

#[cfg(target_os = "linux")]
struct StatFields {
    pgrp: i32,
    utime: u64,
    stime: u64,
}

/// Parses the fields after the comm in `/proc/<pid>/stat`. The comm can
/// itself contain spaces and parentheses, so parsing starts after the
/// last closing paren.
#[cfg(target_os = "linux")]
fn parse_stat(content: &str) -> Option<StatFields> {
    let close = content.rfind(')')?;
    let rest = content.get(close + 1..)?.trim_start();
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // After the comm: [0] state, [1] ppid, [2] pgrp, [11] utime, [12] stime
    Some(StatFields {
        pgrp: fields.get(2)?.parse().ok()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
    })
}

/// Extracts `VmRSS` from `/proc/<pid>/status`, in bytes.
#[cfg(target_os = "linux")]
fn parse_vm_rss(status: &str) -> Option<u64> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

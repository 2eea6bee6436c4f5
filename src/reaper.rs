//! Reaper: idle-session expiry and workspace cleanup.
//!
//! Sessions that see no activity for the configured window are expired.
//! An active session is killed, moved to `expired`, and its workspace
//! deleted; the record survives one more idle window for status queries
//! before it is dropped. Workspace deletion is best effort.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::events::{AuditEvent, Auditor};
use crate::manager::SessionMap;
use crate::process;
use crate::session::{LogStream, SessionId, SessionState};
use crate::workspace;

/// Runs the reaper loop until `shutdown` fires.
pub(crate) async fn run(
    sessions: SessionMap,
    config: Arc<Config>,
    auditor: Auditor,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.reap_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => sweep(&sessions, &config, &auditor).await,
            () = shutdown.cancelled() => break,
        }
    }
    debug!("Reaper stopped");
}

/// One pass over all sessions.
pub(crate) async fn sweep(sessions: &SessionMap, config: &Config, auditor: &Auditor) {
    let idle_expiry = config.idle_expiry();
    let snapshot: Vec<(SessionId, Arc<tokio::sync::Mutex<crate::session::Session>>)> = sessions
        .lock()
        .await
        .iter()
        .map(|(id, handle)| (*id, Arc::clone(handle)))
        .collect();

    let mut drop_records = Vec::new();
    for (id, handle) in snapshot {
        let mut sess = handle.lock().await;
        let idle = Utc::now()
            .signed_duration_since(sess.last_activity_at)
            .to_std()
            .unwrap_or_default();
        if idle <= idle_expiry {
            continue;
        }

        if sess.state().is_terminal() {
            // Terminal and idle past the window: drop record and workspace.
            let dir = sess.workspace.clone();
            drop(sess);
            workspace::remove(&dir).await;
            drop_records.push(id);
            continue;
        }

        // Live session gone idle: kill whatever is running and expire it.
        let pid = sess.process().map(|p| p.pid);
        if !sess.transition(SessionState::Expired) {
            continue;
        }
        sess.record(
            LogStream::System,
            format!("expired after {}s of inactivity", idle.as_secs()),
        );
        sess.cancel.cancel();
        let dir = sess.workspace.clone();
        drop(sess);

        if let Some(pid) = pid {
            process::kill_tree(pid);
        }
        workspace::remove(&dir).await;
        info!("Session {id} expired");
        auditor
            .emit(AuditEvent::execution_end(id, SessionState::Expired, None))
            .await;
    }

    if !drop_records.is_empty() {
        let mut map = sessions.lock().await;
        for id in &drop_records {
            map.remove(id);
        }
        debug!("Dropped {} expired session records", drop_records.len());
    }
}

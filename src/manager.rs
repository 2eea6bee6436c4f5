//! Session manager: the engine's API surface and sole owner of state.
//!
//! All session mutation funnels through the per-session lock held in the
//! shared map; callers only ever see immutable snapshots. The manager
//! admits submissions past validation and the security gate, hands
//! started sessions to a supervisor task, and runs the monitor and
//! reaper in the background.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::FileProfile;
use crate::config::{Config, OverflowPolicy};
use crate::engine::EngineRegistry;
use crate::error::{Result, SandlotError};
use crate::events::{AuditEvent, Auditor};
use crate::monitor;
use crate::process;
use crate::reaper;
use crate::security::{RiskAssessment, SecurityGate};
use crate::session::{
    LogStream, Session, SessionId, SessionState, SessionStatus, SessionSummary,
};
use crate::submission::Submission;
use crate::supervisor::{self, StartPermit};
use crate::workspace;

/// Shared map of all known sessions.
pub(crate) type SessionMap = Arc<Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>>;

/// Reply to a successful `create_session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
    /// Engine selected for the file set.
    pub engine: String,
    pub entrypoint: Option<String>,
    /// Scored in the warn band; admitted but marked for audit.
    pub flagged: bool,
    pub risk: RiskAssessment,
}

/// What a `start_session` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A supervisor task now owns the run.
    Started,
    /// The session is already queued, provisioning, or running.
    AlreadyActive,
    /// The session already reached a terminal state.
    AlreadyFinished,
}

/// Owner of all sessions and their background upkeep.
pub struct SessionManager {
    config: Arc<Config>,
    registry: EngineRegistry,
    gate: SecurityGate,
    auditor: Auditor,
    sessions: SessionMap,
    /// Concurrency cap; one permit per active session.
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Creates a manager with the default engine registry and audit sinks.
    pub fn new(config: Config) -> Self {
        let registry = EngineRegistry::from_config(&config);
        let auditor = Auditor::from_config(&config.audit);
        Self::with_parts(config, registry, auditor)
    }

    /// Creates a manager from explicit parts.
    pub fn with_parts(config: Config, registry: EngineRegistry, auditor: Auditor) -> Self {
        let gate = SecurityGate::new(&config.security);
        let slots = Arc::new(Semaphore::new(config.limits.max_concurrent));
        Self {
            config: Arc::new(config),
            registry,
            gate,
            auditor,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            slots,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The engine registry, in priority order.
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Spawns the resource monitor and the reaper. Safe to call once;
    /// later calls are no-ops.
    pub async fn start_background(&self) {
        let mut tasks = self.background.lock().await;
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(monitor::run(
            Arc::clone(&self.sessions),
            Arc::clone(&self.config),
            self.auditor.clone(),
            self.shutdown.clone(),
        )));
        tasks.push(tokio::spawn(reaper::run(
            Arc::clone(&self.sessions),
            Arc::clone(&self.config),
            self.auditor.clone(),
            self.shutdown.clone(),
        )));
        debug!("Background monitor and reaper started");
    }

    /// Validates and admits a submission, returning a ticket for the new
    /// session. Blocked submissions never get a session or a workspace.
    pub async fn create_session(&self, submission: Submission) -> Result<SessionTicket> {
        submission.validate()?;
        let profile = FileProfile::build(&submission);
        let assessment = self.gate.scan(&submission);
        let id = SessionId::new();

        let block = self.config.security.block_threshold;
        if assessment.exceeds(block) {
            warn!(
                "Submission blocked at risk {} (threshold {block})",
                assessment.score
            );
            self.auditor
                .emit(AuditEvent::blocked_high_risk(id, &assessment, block))
                .await;
            return Err(SandlotError::risk_too_high(assessment, block));
        }
        let flagged = assessment.exceeds(self.config.security.warn_threshold);

        let engine = self.registry.select(&profile)?;
        let entrypoint = engine.entrypoint(&profile);
        let workspace_dir = workspace::create(&self.config.workspace_root(), id).await?;

        let file_count = submission.files.len();
        let session = Session::new(
            id,
            submission.meta.clone(),
            assessment.clone(),
            flagged,
            Arc::clone(&engine),
            profile,
            entrypoint.clone(),
            workspace_dir,
            submission,
            self.config.sessions.log_cap_entries,
        );
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(session)));

        info!(
            "Session {id} created: engine {}, risk {}{}",
            engine.name(),
            assessment.score,
            if flagged { " (flagged)" } else { "" }
        );
        self.auditor
            .emit(AuditEvent::session_created(
                id,
                engine.name(),
                &assessment,
                flagged,
                file_count,
            ))
            .await;

        Ok(SessionTicket {
            session_id: id,
            engine: engine.name().to_string(),
            entrypoint,
            flagged,
            risk: assessment,
        })
    }

    /// Starts a created session. Starting a session that is already on
    /// its way (or finished) reports that instead of failing.
    pub async fn start_session(&self, id: SessionId) -> Result<StartOutcome> {
        let handle = self.session(id).await?;
        let mut sess = handle.lock().await;

        if sess.state().is_terminal() {
            return Ok(StartOutcome::AlreadyFinished);
        }
        if sess.state() != SessionState::Created || sess.start_pending {
            return Ok(StartOutcome::AlreadyActive);
        }

        let permit = match self.config.limits.when_full {
            OverflowPolicy::Reject => match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => StartPermit::Held(permit),
                Err(_) => {
                    let cap = self.config.limits.max_concurrent;
                    let active = cap.saturating_sub(self.slots.available_permits());
                    return Err(SandlotError::capacity(active, cap));
                }
            },
            OverflowPolicy::Queue => StartPermit::Queued(Arc::clone(&self.slots)),
        };

        sess.start_pending = true;
        sess.touch();
        let task = tokio::spawn(supervisor::supervise(
            Arc::clone(&handle),
            self.config.limits_for(sess.engine.name()),
            self.auditor.clone(),
            permit,
        ));
        sess.supervisor = Some(task);
        debug!("Session {id} start accepted");
        Ok(StartOutcome::Started)
    }

    /// Current status snapshot. Reading status counts as activity.
    pub async fn session_status(&self, id: SessionId) -> Result<SessionStatus> {
        let handle = self.session(id).await?;
        let mut sess = handle.lock().await;
        sess.touch();
        Ok(sess.status())
    }

    /// Stops a session, killing its process tree if one is live. Stopping
    /// an already-terminal session returns its status unchanged.
    pub async fn stop_session(&self, id: SessionId) -> Result<SessionStatus> {
        let handle = self.session(id).await?;
        let mut sess = handle.lock().await;

        if sess.state().is_terminal() {
            return Ok(sess.status());
        }

        let pid = sess.process().map(|p| p.pid);
        let stopped = sess.transition(SessionState::Stopped);
        if stopped {
            sess.record(LogStream::System, "stopped by caller");
        }
        sess.cancel.cancel();
        let status = sess.status();
        drop(sess);

        if let Some(pid) = pid {
            process::kill_tree(pid);
        }
        if stopped {
            info!("Session {id} stopped");
            self.auditor
                .emit(AuditEvent::execution_end(id, SessionState::Stopped, None))
                .await;
        }
        Ok(status)
    }

    /// One summary row per known session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<Arc<Mutex<Session>>> =
            self.sessions.lock().await.values().cloned().collect();
        let mut rows = Vec::with_capacity(handles.len());
        for handle in handles {
            rows.push(handle.lock().await.summary());
        }
        rows.sort_by_key(|row| row.created_at);
        rows
    }

    /// Stops everything: background tasks, queued starts, live processes.
    /// Supervisor tasks are joined so no child outlives the call.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.slots.close();

        let handles: Vec<Arc<Mutex<Session>>> =
            self.sessions.lock().await.values().cloned().collect();
        for handle in handles {
            let mut sess = handle.lock().await;
            let pid = sess.process().map(|p| p.pid);
            sess.cancel.cancel();
            let stopped = sess.transition(SessionState::Stopped);
            let task = sess.supervisor.take();
            let id = sess.id;
            drop(sess);

            if let Some(pid) = pid {
                process::kill_tree(pid);
            }
            if let Some(task) = task {
                let _ = task.await;
            }
            if stopped {
                self.auditor
                    .emit(AuditEvent::execution_end(id, SessionState::Stopped, None))
                    .await;
            }
        }

        let mut tasks = self.background.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        debug!("Session manager shut down");
    }

    async fn session(&self, id: SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(SandlotError::not_found(id))
    }
}

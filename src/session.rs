//! Session state: the lifecycle machine, bounded log, and snapshots.
//!
//! A `Session` is only ever mutated by the session manager and the
//! supervisor task that owns its process, always behind the per-session
//! lock. Everything callers see is a cloned snapshot.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classify::FileProfile;
use crate::engine::RuntimeEngine;
use crate::security::RiskAssessment;
use crate::submission::{Submission, ToolMeta};

/// Log entries returned in a status snapshot.
pub const LOG_TAIL_LEN: usize = 100;

/// Opaque, caller-unguessable session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle states. Transitions are one-directional; see `can_transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Provisioning,
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
    Expired,
    Error,
}

impl SessionState {
    /// Fully terminal: nothing further will happen to the session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Expired | Self::Error
        )
    }

    /// Counted against the global concurrency cap.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Provisioning | Self::Starting | Self::Running)
    }

    /// States in which a live process may be attached.
    pub fn may_hold_process(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether the machine permits moving from `self` to `to`.
    pub fn can_transition(self, to: Self) -> bool {
        use SessionState as S;
        matches!(
            (self, to),
            (S::Created, S::Provisioning | S::Stopped | S::Expired)
                | (S::Provisioning, S::Starting | S::Stopped | S::Expired | S::Error)
                | (S::Starting, S::Running | S::Stopped | S::Expired | S::Error)
                | (
                    S::Running,
                    S::Completed | S::Failed | S::Stopped | S::Expired | S::Error
                )
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Provisioning => "provisioning",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Expired => "expired",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Source stream of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Engine-generated entries (stage results, kill causes).
    System,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
        };
        write!(f, "{label}")
    }
}

/// One captured output line, tagged with stream and arrival time.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub stream: LogStream,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Bounded append-only log. Oldest entries are dropped beyond the cap;
/// the drop count is kept so readers can tell the prefix is truncated.
#[derive(Debug)]
pub struct SessionLog {
    entries: VecDeque<LogEntry>,
    cap: usize,
    dropped: u64,
}

impl SessionLog {
    /// Creates a log retaining at most `cap` entries.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
            dropped: 0,
        }
    }

    /// Appends one entry, evicting the oldest beyond the cap.
    pub fn push(&mut self, stream: LogStream, text: impl Into<String>) {
        self.entries.push_back(LogEntry {
            stream,
            text: text.into(),
            at: Utc::now(),
        });
        while self.entries.len() > self.cap {
            self.entries.pop_front();
            self.dropped += 1;
        }
    }

    /// Last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted by the cap so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Latest resource sample for a running session.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceSnapshot {
    /// Resident memory of the process tree, in bytes.
    pub rss_bytes: u64,
    /// Highest resident memory observed so far, in bytes.
    pub peak_rss_bytes: u64,
    /// Cumulative CPU seconds (user plus system) of the tree.
    pub cpu_secs: f64,
    pub sampled_at: DateTime<Utc>,
}

/// Pid of the session's live child. The group id equals the pid because
/// children are spawned as their own process-group leaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// The central per-run entity. Field mutation happens only through the
/// methods below, under the per-session lock.
pub struct Session {
    pub id: SessionId,
    pub meta: ToolMeta,
    pub risk: RiskAssessment,
    /// Scored in the warn band at creation.
    pub flagged: bool,
    pub engine: Arc<dyn RuntimeEngine>,
    /// Classification the engine was selected from; launch decisions
    /// reuse it so selection and execution cannot disagree.
    pub profile: FileProfile,
    pub entrypoint: Option<String>,
    pub workspace: PathBuf,
    /// Consumed by the supervisor when files are materialized.
    pub submission: Option<Submission>,
    state: SessionState,
    process: Option<ProcessHandle>,
    pub log: SessionLog,
    pub exit_code: Option<i32>,
    pub port: Option<u16>,
    pub created_at: DateTime<Utc>,
    /// Stamped on entry to `running`.
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resources: Option<ResourceSnapshot>,
    /// Cancelled by stop/expiry; honored at every supervisor await point.
    pub cancel: CancellationToken,
    /// Set while a start request is queued or underway.
    pub start_pending: bool,
    pub supervisor: Option<JoinHandle<()>>,
}

impl Session {
    /// Creates a session in `created` state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        meta: ToolMeta,
        risk: RiskAssessment,
        flagged: bool,
        engine: Arc<dyn RuntimeEngine>,
        profile: FileProfile,
        entrypoint: Option<String>,
        workspace: PathBuf,
        submission: Submission,
        log_cap: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            meta,
            risk,
            flagged,
            engine,
            profile,
            entrypoint,
            workspace,
            submission: Some(submission),
            state: SessionState::Created,
            process: None,
            log: SessionLog::new(log_cap),
            exit_code: None,
            port: None,
            created_at: now,
            started_at: None,
            last_activity_at: now,
            completed_at: None,
            resources: None,
            cancel: CancellationToken::new(),
            start_pending: false,
            supervisor: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pid of the attached live process, if any.
    pub fn process(&self) -> Option<ProcessHandle> {
        self.process
    }

    /// Marks activity now (creation, start, output, status reads).
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Applies a state transition if the machine allows it.
    ///
    /// Detaches the process when leaving the process-holding states and
    /// stamps `completed_at` on terminal entry, so the process/state
    /// invariant cannot be broken by a legal transition.
    pub fn transition(&mut self, to: SessionState) -> bool {
        if !self.state.can_transition(to) {
            return false;
        }
        self.state = to;
        if to == SessionState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if !to.may_hold_process() {
            self.process = None;
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.start_pending = false;
        }
        self.touch();
        true
    }

    /// Attaches the live process. Refused outside `starting`/`running`
    /// or when a process is already attached.
    pub fn attach_process(&mut self, handle: ProcessHandle) -> bool {
        if !self.state.may_hold_process() || self.process.is_some() {
            return false;
        }
        self.process = Some(handle);
        true
    }

    /// Appends a log entry and marks activity.
    pub fn record(&mut self, stream: LogStream, text: impl Into<String>) {
        self.log.push(stream, text);
        self.touch();
    }

    /// Immutable status snapshot for callers.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            state: self.state,
            exit_code: self.exit_code,
            log_tail: self.log.tail(LOG_TAIL_LEN),
            log_dropped: self.log.dropped(),
            resources: self.resources,
            port: self.port,
            entrypoint: self.entrypoint.clone(),
            engine: self.engine.name().to_string(),
            risk_score: self.risk.score,
            flagged: self.flagged,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            state: self.state,
            risk_score: self.risk.score,
            created_at: self.created_at,
        }
    }
}

/// Snapshot returned by `session_status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub exit_code: Option<i32>,
    /// Most recent log entries, oldest first.
    pub log_tail: Vec<LogEntry>,
    /// Entries lost to the retention cap before this tail.
    pub log_dropped: u64,
    pub resources: Option<ResourceSnapshot>,
    pub port: Option<u16>,
    pub entrypoint: Option<String>,
    pub engine: String,
    pub risk_score: u8,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Row returned by `list_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub state: SessionState,
    pub risk_score: u8,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::NullEngine;
    use crate::submission::SubmittedFile;

    fn session() -> Session {
        let submission =
            Submission::new(vec![SubmittedFile::new("main.sh", "")], ToolMeta::default());
        let profile = FileProfile::build(&submission);
        Session::new(
            SessionId::new(),
            ToolMeta::default(),
            RiskAssessment::default(),
            false,
            Arc::new(NullEngine),
            profile,
            Some("main.sh".to_string()),
            PathBuf::from("/tmp/nowhere"),
            submission,
            100,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::Created);
        assert!(s.transition(SessionState::Provisioning));
        assert!(s.transition(SessionState::Starting));
        assert!(s.transition(SessionState::Running));
        assert!(s.transition(SessionState::Completed));
        assert!(s.state().is_terminal());
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut s = session();
        s.transition(SessionState::Provisioning);
        s.transition(SessionState::Starting);
        assert!(!s.transition(SessionState::Provisioning));
        assert!(!s.transition(SessionState::Created));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = session();
        s.transition(SessionState::Provisioning);
        s.transition(SessionState::Stopped);
        assert!(!s.transition(SessionState::Starting));
        assert!(!s.transition(SessionState::Running));
        assert!(!s.transition(SessionState::Expired));
    }

    #[test]
    fn test_created_can_be_stopped_or_expired() {
        let mut s = session();
        assert!(s.transition(SessionState::Stopped));

        let mut s = session();
        assert!(s.transition(SessionState::Expired));
    }

    #[test]
    fn test_error_only_from_active_states() {
        let mut s = session();
        assert!(!s.transition(SessionState::Error));
        s.transition(SessionState::Provisioning);
        assert!(s.transition(SessionState::Error));
    }

    #[test]
    fn test_process_attach_requires_holding_state() {
        let mut s = session();
        let handle = ProcessHandle { pid: 4242 };
        assert!(!s.attach_process(handle));

        s.transition(SessionState::Provisioning);
        s.transition(SessionState::Starting);
        assert!(s.attach_process(handle));
        assert_eq!(s.process(), Some(handle));

        // Second attach refused while one is live
        assert!(!s.attach_process(ProcessHandle { pid: 4243 }));
    }

    #[test]
    fn test_transition_detaches_process() {
        let mut s = session();
        s.transition(SessionState::Provisioning);
        s.transition(SessionState::Starting);
        s.attach_process(ProcessHandle { pid: 4242 });
        s.transition(SessionState::Running);
        assert!(s.process().is_some());

        s.transition(SessionState::Completed);
        assert!(s.process().is_none());
    }

    #[test]
    fn test_log_cap_drops_oldest() {
        let mut log = SessionLog::new(3);
        for i in 0..5 {
            log.push(LogStream::Stdout, format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.dropped(), 2);
        let texts: Vec<_> = log.snapshot().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_log_tail_returns_newest() {
        let mut log = SessionLog::new(10);
        for i in 0..5 {
            log.push(LogStream::Stdout, format!("line {i}"));
        }
        let tail: Vec<_> = log.tail(2).into_iter().map(|e| e.text).collect();
        assert_eq!(tail, vec!["line 3", "line 4"]);
    }

    #[test]
    fn test_log_preserves_arrival_order_across_streams() {
        let mut log = SessionLog::new(10);
        log.push(LogStream::Stdout, "out 1");
        log.push(LogStream::Stderr, "err 1");
        log.push(LogStream::System, "killed");
        let streams: Vec<_> = log.snapshot().into_iter().map(|e| e.stream).collect();
        assert_eq!(
            streams,
            vec![LogStream::Stdout, LogStream::Stderr, LogStream::System]
        );
    }

    #[test]
    fn test_status_snapshot_reflects_session() {
        let mut s = session();
        s.record(LogStream::System, "materialized 1 file");
        let status = s.status();
        assert_eq!(status.state, SessionState::Created);
        assert_eq!(status.engine, "null");
        assert_eq!(status.entrypoint.as_deref(), Some("main.sh"));
        assert_eq!(status.log_tail.len(), 1);
        assert!(status.exit_code.is_none());
    }

    #[test]
    fn test_session_id_round_trips_through_display() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}

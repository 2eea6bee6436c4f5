//! Per-session execution driver.
//!
//! One supervisor task owns a session end to end: it materializes the
//! submitted files, runs the engine's install and build stages, launches
//! the confined child, pumps its output into the session log, and applies
//! the terminal transition when the run ends for any reason. Other actors
//! (stop, monitor, reaper) only cancel and transition; races resolve
//! through the state machine, so the first terminal transition wins.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EffectiveLimits;
use crate::engine::{LaunchContext, ProvisionStage, StageContext, StageKind};
use crate::error::SandlotError;
use crate::events::{AuditEvent, Auditor};
use crate::process::{self, SpawnSpec};
use crate::session::{LogStream, ProcessHandle, Session, SessionState};
use crate::workspace;

/// How long to wait for the output pumps after the process tree is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Concurrency admission for one start request.
pub(crate) enum StartPermit {
    /// Permit acquired up front (reject-on-full policy).
    Held(OwnedSemaphorePermit),
    /// Permit acquired inside the task, racing cancellation (queue policy).
    Queued(Arc<Semaphore>),
}

/// How the launched process ended.
#[derive(Clone, Copy)]
enum RunOutcome {
    Exited,
    DeadlineExceeded,
    Cancelled,
}

enum StageOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Drives one session from `created` to a terminal state.
pub(crate) async fn supervise(
    session: Arc<Mutex<Session>>,
    limits: EffectiveLimits,
    auditor: Auditor,
    permit: StartPermit,
) {
    let Some(_permit) = admit(&session, permit).await else {
        return;
    };

    // Claim the session. A stop or expiry that won the race leaves it
    // terminal and there is nothing left to do.
    let (id, engine, profile, entrypoint, workspace_dir, submission, cancel) = {
        let mut sess = session.lock().await;
        if !sess.transition(SessionState::Provisioning) {
            debug!(
                "Session {} not startable in state {}",
                sess.id,
                sess.state()
            );
            return;
        }
        let Some(submission) = sess.submission.take() else {
            sess.record(LogStream::System, "submission already consumed");
            sess.transition(SessionState::Error);
            return;
        };
        (
            sess.id,
            Arc::clone(&sess.engine),
            sess.profile.clone(),
            sess.entrypoint.clone(),
            sess.workspace.clone(),
            submission,
            sess.cancel.clone(),
        )
    };

    match workspace::materialize(&workspace_dir, &submission).await {
        Ok(count) => debug!("Materialized {count} files for session {id}"),
        Err(err) => {
            fail(&session, &auditor, format!("workspace setup failed: {err}")).await;
            return;
        }
    }

    for stage in engine.provision_stages(&StageContext {
        workspace: &workspace_dir,
        profile: &profile,
    }) {
        let timeout = match stage.kind {
            StageKind::Install => limits.install_timeout,
            StageKind::Build => limits.build_timeout,
        };
        match run_stage(&session, &stage, &workspace_dir, timeout, &cancel).await {
            StageOutcome::Succeeded => {}
            StageOutcome::Failed(detail) => {
                let err = match stage.kind {
                    StageKind::Install => SandlotError::install_failed(detail),
                    StageKind::Build => SandlotError::build_failed(detail),
                };
                fail(&session, &auditor, err.to_string()).await;
                return;
            }
            StageOutcome::Cancelled => {
                finish_cancelled(&session, &auditor).await;
                return;
            }
        }
    }

    let port = if engine.kind().wants_port() {
        match process::allocate_port() {
            Ok(port) => {
                session.lock().await.port = Some(port);
                Some(port)
            }
            Err(err) => {
                fail(&session, &auditor, format!("port allocation failed: {err}")).await;
                return;
            }
        }
    } else {
        None
    };

    let plan = match engine.launch_plan(&LaunchContext {
        workspace: &workspace_dir,
        profile: &profile,
        entrypoint: entrypoint.as_deref(),
        port,
    }) {
        Ok(plan) => plan,
        Err(err) => {
            fail(&session, &auditor, err.to_string()).await;
            return;
        }
    };

    if !session.lock().await.transition(SessionState::Starting) {
        return;
    }

    let mut child = match process::spawn_confined(&SpawnSpec {
        program: &plan.program,
        args: &plan.args,
        workspace: &workspace_dir,
        env: &plan.env,
        port,
    }) {
        Ok(child) => child,
        Err(err) => {
            let err = SandlotError::spawn_failed(format!("{}: {err}", plan.program));
            fail(&session, &auditor, err.to_string()).await;
            return;
        }
    };
    let pid = child.id().unwrap_or(0);

    {
        let mut sess = session.lock().await;
        if !sess.attach_process(ProcessHandle { pid }) {
            // A stop raced the spawn; the child never gets to run.
            drop(sess);
            process::kill_tree(pid);
            let _ = child.wait().await;
            finish_cancelled(&session, &auditor).await;
            return;
        }
        sess.transition(SessionState::Running);
        sess.record(
            LogStream::System,
            format!("launched {} (pid {pid})", plan.program),
        );
    }

    auditor
        .emit(AuditEvent::execution_start(
            id,
            engine.name(),
            entrypoint.as_deref(),
            port,
        ))
        .await;

    let stdout_pump = child
        .stdout
        .take()
        .map(|out| spawn_pump(Arc::clone(&session), LogStream::Stdout, out));
    let stderr_pump = child
        .stderr
        .take()
        .map(|err| spawn_pump(Arc::clone(&session), LogStream::Stderr, err));

    let deadline = tokio::time::sleep(limits.run_timeout);
    tokio::pin!(deadline);

    let (outcome, status) = tokio::select! {
        status = child.wait() => (RunOutcome::Exited, status.ok()),
        () = &mut deadline => (RunOutcome::DeadlineExceeded, None),
        () = cancel.cancelled() => (RunOutcome::Cancelled, None),
    };

    // The tree dies with the session in every outcome. Stragglers would
    // hold the output pipes open and leak past the workspace's lifetime.
    process::kill_tree(pid);
    let status = match status {
        Some(status) => Some(status),
        None => child.wait().await.ok(),
    };
    drain(stdout_pump).await;
    drain(stderr_pump).await;

    let mut sess = session.lock().await;
    match outcome {
        RunOutcome::Exited => {
            let code = status.and_then(|s| s.code());
            let next = if code == Some(0) {
                SessionState::Completed
            } else {
                SessionState::Failed
            };
            if sess.transition(next) {
                sess.exit_code = code;
                if next == SessionState::Failed {
                    let note = match code {
                        Some(code) => format!("process exited with status {code}"),
                        None => "process terminated by signal".to_string(),
                    };
                    sess.record(LogStream::System, note);
                }
                drop(sess);
                auditor.emit(AuditEvent::execution_end(id, next, code)).await;
            }
        }
        RunOutcome::DeadlineExceeded => {
            if sess.transition(SessionState::Stopped) {
                sess.record(
                    LogStream::System,
                    format!(
                        "run time limit of {}s exceeded; process tree killed",
                        limits.run_timeout.as_secs()
                    ),
                );
                drop(sess);
                auditor
                    .emit(AuditEvent::execution_end(id, SessionState::Stopped, None))
                    .await;
            }
        }
        RunOutcome::Cancelled => {
            // stop_session usually applies the transition itself before
            // cancelling; this covers a bare token fire.
            if sess.transition(SessionState::Stopped) {
                drop(sess);
                auditor
                    .emit(AuditEvent::execution_end(id, SessionState::Stopped, None))
                    .await;
            }
        }
    }
}

/// Resolves the concurrency permit, or `None` when the start was
/// cancelled before a slot opened.
async fn admit(
    session: &Arc<Mutex<Session>>,
    permit: StartPermit,
) -> Option<OwnedSemaphorePermit> {
    match permit {
        StartPermit::Held(permit) => Some(permit),
        StartPermit::Queued(semaphore) => {
            let cancel = session.lock().await.cancel.clone();
            tokio::select! {
                acquired = semaphore.acquire_owned() => acquired.ok(),
                () = cancel.cancelled() => None,
            }
        }
    }
}

/// Runs one install/build stage to completion under its timeout,
/// recording its output into the session log.
async fn run_stage(
    session: &Arc<Mutex<Session>>,
    stage: &ProvisionStage,
    workspace_dir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> StageOutcome {
    debug!(
        "Running {} stage: {} {:?}",
        stage.kind, stage.program, stage.args
    );
    session.lock().await.record(
        LogStream::System,
        format!("{} stage: {} {}", stage.kind, stage.program, stage.args.join(" ")),
    );

    let child = match process::spawn_confined(&SpawnSpec {
        program: &stage.program,
        args: &stage.args,
        workspace: workspace_dir,
        env: &stage.env,
        port: None,
    }) {
        Ok(child) => child,
        Err(err) => {
            return StageOutcome::Failed(format!("failed to spawn {}: {err}", stage.program));
        }
    };
    let pid = child.id().unwrap_or(0);

    let result = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => result,
        () = cancel.cancelled() => {
            process::kill_tree(pid);
            return StageOutcome::Cancelled;
        }
    };

    match result {
        Err(_) => {
            process::kill_tree(pid);
            StageOutcome::Failed(format!(
                "{} stage timed out after {}s",
                stage.kind,
                timeout.as_secs()
            ))
        }
        Ok(Err(err)) => {
            process::kill_tree(pid);
            StageOutcome::Failed(format!("{} stage did not finish: {err}", stage.kind))
        }
        Ok(Ok(output)) => {
            record_stage_output(session, &output).await;
            if output.status.success() {
                StageOutcome::Succeeded
            } else {
                let status = output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string());
                StageOutcome::Failed(format!("{} stage exited with status {status}", stage.kind))
            }
        }
    }
}

async fn record_stage_output(session: &Arc<Mutex<Session>>, output: &std::process::Output) {
    let mut sess = session.lock().await;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        sess.log.push(LogStream::Stdout, line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        sess.log.push(LogStream::Stderr, line);
    }
    sess.touch();
}

/// Copies one output stream into the session log, line by line.
fn spawn_pump<R>(session: Arc<Mutex<Session>>, stream: LogStream, reader: R) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            session.lock().await.record(stream, line);
        }
    })
}

/// Waits for an output pump to hit end-of-stream.
async fn drain(pump: Option<JoinHandle<()>>) {
    let Some(mut handle) = pump else {
        return;
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(_) => {}
        Err(_) => handle.abort(),
    }
}

/// Records a provisioning failure and moves the session to `error`.
async fn fail(session: &Arc<Mutex<Session>>, auditor: &Auditor, note: String) {
    let mut sess = session.lock().await;
    warn!("Session {} setup failed: {note}", sess.id);
    sess.record(LogStream::System, note);
    if sess.transition(SessionState::Error) {
        let id = sess.id;
        drop(sess);
        auditor
            .emit(AuditEvent::execution_end(id, SessionState::Error, None))
            .await;
    }
}

/// Applies the stopped transition for a cancellation observed before the
/// stopping actor got to it.
async fn finish_cancelled(session: &Arc<Mutex<Session>>, auditor: &Auditor) {
    let mut sess = session.lock().await;
    if sess.transition(SessionState::Stopped) {
        let id = sess.id;
        drop(sess);
        auditor
            .emit(AuditEvent::execution_end(id, SessionState::Stopped, None))
            .await;
    }
}

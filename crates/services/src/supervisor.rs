//! Backend process supervision and the readiness handshake.
//!
//! Startup is strictly ordered: spawn → readiness signal (stdout marker, or the
//! marker timeout) → bounded health polling → ready. The supervisor owns the
//! only child process handle; `stop()` is the one way back to `Idle`.

use crate::launch::LaunchPlan;
use crate::process_control::{self, exit_details, StopOutcome};
use shared::error::ShellError;
use shared::poll::{poll_until, PollError, PollPolicy, PollStep};
use shared::settings::{BackendSettings, ReadinessStrategy, RunMode};
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Spawning,
    AwaitingReadinessSignal,
    HealthPolling,
    Ready,
    Failed(String),
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => f.write_str("idle"),
            SupervisorState::Spawning => f.write_str("spawning"),
            SupervisorState::AwaitingReadinessSignal => f.write_str("awaiting readiness signal"),
            SupervisorState::HealthPolling => f.write_str("health polling"),
            SupervisorState::Ready => f.write_str("ready"),
            SupervisorState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

pub struct BackendSupervisor {
    mode: RunMode,
    backend: BackendSettings,
    http: reqwest::Client,
    child: Option<Child>,
    state: SupervisorState,
}

impl BackendSupervisor {
    pub fn new(mode: RunMode, backend: BackendSettings) -> Self {
        Self {
            mode,
            backend,
            http: reqwest::Client::new(),
            child: None,
            state: SupervisorState::Idle,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// `start` followed by `wait_healthy`.
    pub async fn launch(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        self.start(cancel).await?;
        self.wait_healthy(cancel).await
    }

    /// Spawn the backend and wait for its readiness signal.
    ///
    /// Returns once the readiness marker was printed (plus the settle delay),
    /// or the marker wait elapsed. Fails if the process exits first or `cancel` fires.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        if self.state != SupervisorState::Idle {
            return Err(self.invalid_state("start"));
        }

        self.state = SupervisorState::Spawning;
        let result = self.spawn_and_await_signal(cancel).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn spawn_and_await_signal(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        let plan = LaunchPlan::resolve(self.mode, &self.backend)?;
        tracing::info!(
            mode = self.mode.as_str(),
            command = %plan.display_command(),
            "starting backend"
        );

        let piped = self.backend.readiness == ReadinessStrategy::StdoutMarker;
        let output = || if piped { Stdio::piped() } else { Stdio::null() };

        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true);
        if let Some(cwd) = &plan.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            program: plan.program.display().to_string(),
            source,
        })?;
        tracing::info!(pid = child.id(), "backend process spawned");

        self.state = SupervisorState::AwaitingReadinessSignal;
        if piped {
            let marker = forward_output(&mut child, &self.backend.readiness_marker);
            let signal = await_readiness_signal(
                &mut child,
                marker,
                self.backend.marker_wait(),
                self.backend.settle_delay(),
                cancel,
            )
            .await;
            if let Err(e) = signal {
                // Keep a still-running child so stop() can shut it down
                if matches!(e, ShellError::Cancelled) {
                    self.child = Some(child);
                }
                return Err(e);
            }
        } else if cancel.is_cancelled() {
            self.child = Some(child);
            return Err(ShellError::Cancelled);
        }

        self.child = Some(child);
        self.state = SupervisorState::HealthPolling;
        Ok(())
    }

    /// Poll the health endpoint until it answers 200 or the attempt cap is hit.
    pub async fn wait_healthy(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        if self.state != SupervisorState::HealthPolling {
            return Err(self.invalid_state("wait for health"));
        }

        match self.poll_health(cancel).await {
            Ok(()) => {
                tracing::info!(url = %self.backend.health_url(), "backend health check passed");
                self.state = SupervisorState::Ready;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn poll_health(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        let policy = PollPolicy::new(
            self.backend.health_interval(),
            self.backend.health_max_attempts,
        );
        let url = self.backend.health_url();
        let timeout = self.backend.health_timeout();
        let http = self.http.clone();

        let Some(child) = self.child.as_mut() else {
            return Err(ShellError::BackendCrashed {
                code: None,
                signal: None,
            });
        };

        let probe = |attempt: u32| probe_health(http.clone(), url.clone(), timeout, attempt);

        let watched = tokio::select! {
            polled = poll_until(&policy, cancel, probe) => Watched::Polled(polled),
            status = child.wait() => Watched::Exited(status),
        };

        match watched {
            Watched::Polled(Ok(())) => Ok(()),
            Watched::Polled(Err(PollError::Cancelled)) => Err(ShellError::Cancelled),
            Watched::Polled(Err(PollError::Exhausted {
                attempts,
                last_error,
            })) => {
                let last_error = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "non-200 status".to_string());
                tracing::warn!(
                    attempts,
                    last_error = %last_error,
                    "backend health check failed after maximum retries"
                );
                Err(ShellError::HealthCheckTimeout { attempts })
            }
            Watched::Polled(Err(PollError::Failed { attempt, .. })) => {
                Err(ShellError::HealthCheckTimeout { attempts: attempt })
            }
            Watched::Exited(status) => {
                self.child = None;
                Err(crashed(status?))
            }
        }
    }

    /// Terminate the backend: graceful signal, then a forced kill after the grace period.
    ///
    /// Safe to call repeatedly; without a running child it does nothing.
    pub async fn stop(&mut self) -> Result<StopOutcome, ShellError> {
        let Some(mut child) = self.child.take() else {
            self.state = SupervisorState::Idle;
            return Ok(StopOutcome::NotRunning);
        };

        let outcome = process_control::stop_child_gracefully(&mut child, self.backend.stop_grace()).await;
        self.state = SupervisorState::Idle;
        Ok(outcome?)
    }

    fn fail(&mut self, error: &ShellError) {
        tracing::error!(state = %self.state, error = %error, "backend supervision failed");
        self.state = SupervisorState::Failed(error.to_string());
    }

    fn invalid_state(&self, action: &'static str) -> ShellError {
        ShellError::InvalidState {
            state: self.state.to_string(),
            action,
        }
    }
}

enum Watched {
    Polled(Result<(), PollError<reqwest::Error>>),
    Exited(io::Result<ExitStatus>),
}

async fn probe_health(
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    attempt: u32,
) -> Result<PollStep<()>, reqwest::Error> {
    let resp = http.get(&url).timeout(timeout).send().await?;
    if resp.status() == reqwest::StatusCode::OK {
        Ok(PollStep::Done(()))
    } else {
        tracing::debug!(attempt, status = %resp.status(), "backend not healthy yet");
        Ok(PollStep::Pending)
    }
}

fn crashed(status: ExitStatus) -> ShellError {
    let (code, signal) = exit_details(&status);
    tracing::error!(?code, ?signal, "backend process exited");
    ShellError::BackendCrashed { code, signal }
}

/// Forward child output to the log and report lines containing `marker` on either stream.
///
/// The receiver yields once per marker line and closes when both streams end.
fn forward_output(child: &mut Child, marker: &str) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, false, marker.to_string(), tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, true, marker.to_string(), tx));
    }
    rx
}

async fn pump_lines<R>(stream: R, is_stderr: bool, marker: String, tx: mpsc::Sender<()>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::warn!(target: "backend", "{}", line);
        } else {
            tracing::info!(target: "backend", "{}", line);
        }
        if line.contains(&marker) {
            let _ = tx.try_send(());
        }
    }
}

async fn await_readiness_signal(
    child: &mut Child,
    mut marker: mpsc::Receiver<()>,
    wait: Duration,
    settle: Duration,
    cancel: &CancellationToken,
) -> Result<(), ShellError> {
    let deadline = Instant::now() + wait;

    let marker_seen = tokio::select! {
        _ = cancel.cancelled() => return Err(ShellError::Cancelled),
        status = child.wait() => return Err(crashed(status?)),
        seen = marker.recv() => seen.is_some(),
        _ = tokio::time::sleep_until(deadline) => false,
    };

    if !marker_seen {
        // Output closed early or the wait ran out; an exit before the deadline still counts.
        tokio::select! {
            _ = cancel.cancelled() => return Err(ShellError::Cancelled),
            status = child.wait() => return Err(crashed(status?)),
            _ = tokio::time::sleep_until(deadline) => {}
        }
        tracing::warn!(
            wait_ms = wait.as_millis() as u64,
            "readiness marker not seen, falling back to health polling"
        );
        return Ok(());
    }

    tracing::info!(settle_ms = settle.as_millis() as u64, "readiness marker seen");
    tokio::select! {
        _ = cancel.cancelled() => Err(ShellError::Cancelled),
        status = child.wait() => Err(crashed(status?)),
        _ = tokio::time::sleep(settle) => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;
    use std::time::Instant as StdInstant;

    fn settings(port: u16, script: &str) -> BackendSettings {
        BackendSettings {
            port,
            command: Some(vec!["sh".into(), "-c".into(), script.into()]),
            marker_wait_ms: 5_000,
            settle_delay_ms: 20,
            health_interval_ms: 50,
            health_timeout_ms: 500,
            health_max_attempts: 40,
            stop_grace_ms: 1_000,
            ..Default::default()
        }
    }

    const READY_SCRIPT: &str = "echo 'INFO: Uvicorn running on http://127.0.0.1'; exec sleep 30";

    #[tokio::test]
    async fn test_launch_reaches_ready_and_stops_twice() {
        let backend = FakeBackend::healthy_after_failures(2);
        let mut sup = BackendSupervisor::new(RunMode::Packaged, settings(backend.port, READY_SCRIPT));

        sup.launch(&CancellationToken::new()).await.unwrap();
        assert_eq!(sup.state(), &SupervisorState::Ready);
        assert_eq!(backend.hits(), 3);
        assert!(sup.pid().is_some());

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Graceful);
        assert_eq!(sup.state(), &SupervisorState::Idle);
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut sup = BackendSupervisor::new(RunMode::Packaged, BackendSettings::default());
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::NotRunning);
        assert_eq!(sup.state(), &SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_crash_before_ready() {
        let mut sup = BackendSupervisor::new(RunMode::Packaged, settings(1, "exit 3"));
        let err = sup.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ShellError::BackendCrashed {
                code: Some(3),
                signal: None
            }
        ));
        assert!(matches!(sup.state(), SupervisorState::Failed(_)));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_health_poll_stops_at_cap() {
        let backend = FakeBackend::never_healthy();
        let mut cfg = settings(backend.port, READY_SCRIPT);
        cfg.health_max_attempts = 4;
        cfg.health_interval_ms = 20;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let err = sup.launch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ShellError::HealthCheckTimeout { attempts: 4 }));
        assert_eq!(backend.hits(), 4);
        assert!(matches!(sup.state(), SupervisorState::Failed(_)));

        // The child is still ours to clean up after a failed handshake.
        assert!(sup.is_running());
        assert_ne!(sup.stop().await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_crash_while_health_polling() {
        let backend = FakeBackend::never_healthy();
        let script = "echo 'Uvicorn running'; sleep 0.3; exit 2";
        let mut sup = BackendSupervisor::new(RunMode::Packaged, settings(backend.port, script));

        let err = sup.launch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ShellError::BackendCrashed { code: Some(2), .. }
        ));
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_marker_timeout_falls_back_to_health() {
        let backend = FakeBackend::healthy_after_failures(0);
        let mut cfg = settings(backend.port, "exec sleep 30");
        cfg.marker_wait_ms = 200;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let started = StdInstant::now();
        sup.start(&CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(sup.state(), &SupervisorState::HealthPolling);
        assert_eq!(backend.hits(), 0);

        sup.wait_healthy(&CancellationToken::new()).await.unwrap();
        assert_eq!(sup.state(), &SupervisorState::Ready);
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_only_skips_marker() {
        let backend = FakeBackend::healthy_after_failures(1);
        let mut cfg = settings(backend.port, "exec sleep 30");
        cfg.readiness = ReadinessStrategy::HealthOnly;
        cfg.marker_wait_ms = 60_000;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let started = StdInstant::now();
        sup.launch(&CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.hits(), 2);
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_not_before_backend_turns_healthy() {
        let delay = Duration::from_millis(500);
        let backend = FakeBackend::healthy_after(delay);
        let mut cfg = settings(backend.port, READY_SCRIPT);
        cfg.health_interval_ms = 100;
        cfg.settle_delay_ms = 0;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        sup.launch(&CancellationToken::new()).await.unwrap();
        let elapsed = backend.elapsed();
        assert!(elapsed >= delay, "ready after {:?}", elapsed);
        assert!(elapsed < delay + Duration::from_millis(100) + Duration::from_millis(400));
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let backend = FakeBackend::healthy_after_failures(0);
        let mut sup = BackendSupervisor::new(RunMode::Packaged, settings(backend.port, READY_SCRIPT));
        sup.start(&CancellationToken::new()).await.unwrap();

        let err = sup.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ShellError::InvalidState { action: "start", .. }));
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_packaged_executable() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BackendSettings {
            resources_dir: Some(dir.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let err = sup.start(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_missing_artifact());
        assert!(matches!(sup.state(), SupervisorState::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_health_poll() {
        let backend = FakeBackend::never_healthy();
        let mut sup = BackendSupervisor::new(RunMode::Packaged, settings(backend.port, READY_SCRIPT));
        sup.start(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trip.cancel();
        });

        let err = sup.wait_healthy(&cancel).await.unwrap_err();
        assert!(matches!(err, ShellError::Cancelled));
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_marker_wait() {
        let backend = FakeBackend::never_healthy();
        let mut cfg = settings(backend.port, "exec sleep 30");
        cfg.marker_wait_ms = 3_000;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trip.cancel();
        });

        let started = StdInstant::now();
        let err = sup.launch(&cancel).await.unwrap_err();
        assert!(matches!(err, ShellError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(backend.hits(), 0);

        // The child survives cancellation until stop() reaps it
        assert!(sup.is_running());
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_cancel_during_settle_delay() {
        let backend = FakeBackend::never_healthy();
        let mut cfg = settings(backend.port, READY_SCRIPT);
        cfg.settle_delay_ms = 3_000;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trip.cancel();
        });

        let started = StdInstant::now();
        let err = sup.start(&cancel).await.unwrap_err();
        assert!(matches!(err, ShellError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_marker_on_stderr_counts() {
        let backend = FakeBackend::healthy_after_failures(0);
        let mut cfg = settings(backend.port, "echo 'INFO: Uvicorn running on http://127.0.0.1' >&2; exec sleep 30");
        cfg.marker_wait_ms = 10_000;
        let mut sup = BackendSupervisor::new(RunMode::Packaged, cfg);

        let started = StdInstant::now();
        sup.start(&CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sup.state(), &SupervisorState::HealthPolling);
        sup.stop().await.unwrap();
    }
}

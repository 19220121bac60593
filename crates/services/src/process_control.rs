//! Stopping the backend child: graceful signal first, forced kill after a grace period.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

#[cfg(target_os = "windows")]
const WINDOWS_CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no child to stop
    NotRunning,
    /// The child had already exited on its own
    AlreadyExited,
    /// Exited within the grace period after the graceful signal
    Graceful,
    /// Ignored the graceful signal and was force-killed
    Forced,
}

/// Exit code and (on Unix) terminating signal of a finished child.
pub fn exit_details(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    (status.code(), signal)
}

async fn run_stop_command(pid: u32, label: &str, program: &str, args: &[&str]) -> io::Result<ExitStatus> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(target_os = "windows")]
    {
        // Avoid flashing a console window when invoking taskkill.
        command.creation_flags(WINDOWS_CREATE_NO_WINDOW);
    }

    let status = command.status().await;
    match &status {
        Ok(s) if s.success() => {}
        Ok(s) => tracing::warn!(pid, status = ?s, "{label} returned non-zero"),
        Err(e) => tracing::warn!(pid, error = %e, "{label} failed to start"),
    }
    status
}

/// `taskkill` arguments for the whole process tree of `pid`.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn taskkill_args(pid_arg: &str, force: bool) -> Vec<&str> {
    let mut args = vec!["/pid", pid_arg, "/t"];
    if force {
        args.push("/f");
    }
    args
}

#[cfg(not(target_os = "windows"))]
async fn send_graceful_signal(pid: u32) -> io::Result<ExitStatus> {
    let pid_arg = pid.to_string();
    run_stop_command(pid, "kill -TERM", "kill", &["-TERM", &pid_arg]).await
}

#[cfg(target_os = "windows")]
async fn send_graceful_signal(pid: u32) -> io::Result<ExitStatus> {
    let pid_arg = pid.to_string();
    run_stop_command(pid, "taskkill graceful stop", "taskkill", &taskkill_args(&pid_arg, false)).await
}

#[cfg(not(target_os = "windows"))]
async fn force_kill(child: &mut Child, _pid: u32) -> io::Result<()> {
    child.start_kill()
}

/// Kill the whole tree so helpers spawned by the frozen backend go too.
#[cfg(target_os = "windows")]
async fn force_kill(child: &mut Child, pid: u32) -> io::Result<()> {
    let pid_arg = pid.to_string();
    match run_stop_command(pid, "taskkill force stop", "taskkill", &taskkill_args(&pid_arg, true)).await {
        Ok(status) if status.success() => Ok(()),
        _ => child.start_kill(),
    }
}

/// Ask the child to exit, wait up to `grace`, then force-kill it.
///
/// The forced kill is issued at most once.
pub async fn stop_child_gracefully(child: &mut Child, grace: Duration) -> io::Result<StopOutcome> {
    if let Some(status) = child.try_wait()? {
        tracing::debug!(status = %status, "backend already exited before stop");
        return Ok(StopOutcome::AlreadyExited);
    }
    let Some(pid) = child.id() else {
        return Ok(StopOutcome::AlreadyExited);
    };

    tracing::info!(pid, grace_ms = grace.as_millis() as u64, "terminating backend process");
    // A failed signal still gets the full grace period; the forced kill covers it.
    let _ = send_graceful_signal(pid).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            tracing::info!(pid, status = %status, "backend exited after graceful signal");
            Ok(StopOutcome::Graceful)
        }
        Err(_) => {
            tracing::warn!(pid, "backend ignored graceful signal, force killing");
            force_kill(child, pid).await?;
            let status = child.wait().await?;
            tracing::info!(pid, status = %status, "backend force killed");
            Ok(StopOutcome::Forced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::time::Instant;

    #[test]
    fn test_taskkill_covers_process_tree() {
        assert_eq!(taskkill_args("42", false), vec!["/pid", "42", "/t"]);
        assert_eq!(taskkill_args("42", true), vec!["/pid", "42", "/t", "/f"]);
    }

    #[cfg(unix)]
    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sh")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_graceful_stop() {
        let mut child = spawn_sh("exec sleep 30");
        let outcome = stop_child_gracefully(&mut child, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_escalates_when_term_is_ignored() {
        let mut child = spawn_sh("trap '' TERM; while true; do sleep 0.1; done");
        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        let outcome = stop_child_gracefully(&mut child, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(outcome, StopOutcome::Forced);
        assert!(start.elapsed() >= Duration::from_millis(500));
        let status = child.try_wait().unwrap().expect("child reaped");
        assert_eq!(exit_details(&status), (None, Some(9)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_already_exited() {
        let mut child = spawn_sh("exit 0");
        child.wait().await.unwrap();
        let outcome = stop_child_gracefully(&mut child, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyExited);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_details_reports_code() {
        let mut child = spawn_sh("exit 7");
        let status = child.wait().await.unwrap();
        assert_eq!(exit_details(&status), (Some(7), None));
    }
}

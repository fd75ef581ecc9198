//! Shared subprocess plumbing for ffmpeg/ffprobe invocations: spawn,
//! graceful-then-forced termination, and stderr tail capture for error
//! reporting. Every component that shells out to ffmpeg or ffprobe goes
//! through here rather than calling `tokio::process::Command` directly.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::error::ProcessError;

const STDERR_TAIL_BYTES: usize = 4096;

/// Builds a `tokio::process::Command` with the discipline every spawned
/// ffmpeg/ffprobe process needs: `kill_on_drop(true)` so an orphaned
/// `Child` handle does not leak a process if the owning task panics or is
/// cancelled before an explicit kill.
pub fn command(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.kill_on_drop(true);
    cmd
}

/// Runs a short-lived process to completion and returns its stdout,
/// erroring on non-zero exit. Used for ffprobe invocations.
pub async fn run_capturing_stdout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Vec<u8>, ProcessError> {
    let mut cmd = command(program, args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let program_owned = program.to_string();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(output.stdout)
            } else {
                Err(ProcessError::NonZeroExit {
                    program: program_owned,
                    status: output.status.code().unwrap_or(-1),
                    stderr_tail: tail_str(&output.stderr),
                })
            }
        }
        Ok(Err(source)) => Err(ProcessError::Spawn {
            program: program_owned,
            source,
        }),
        Err(_) => Err(ProcessError::TimedOut {
            program: program_owned,
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Runs a short-lived process, feeding `input` to its stdin and capturing
/// stdout. Used for the piped-probe fallback strategy.
pub async fn run_with_stdin_capturing_stdout(
    program: &str,
    args: &[String],
    input: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, ProcessError> {
    let mut cmd = command(program, args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(input).await;
        let _ = stdin.shutdown().await;
    }

    let program_owned = program.to_string();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(output.stdout)
            } else {
                Err(ProcessError::NonZeroExit {
                    program: program_owned,
                    status: output.status.code().unwrap_or(-1),
                    stderr_tail: tail_str(&output.stderr),
                })
            }
        }
        Ok(Err(source)) => Err(ProcessError::Spawn {
            program: program_owned,
            source,
        }),
        Err(_) => Err(ProcessError::TimedOut {
            program: program_owned,
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Spawns a long-lived ffmpeg process (HLS session, transmux, subtitle
/// extraction) with piped stdio, returning the live `Child` handle for the
/// caller to own.
pub fn spawn_long_lived(
    program: &str,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Child, ProcessError> {
    let mut cmd = command(program, args);
    cmd.stdin(stdin).stdout(stdout).stderr(stderr);
    cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })
}

/// Stops a running child: SIGTERM, then SIGKILL after `grace` elapses
/// without the process exiting. On non-Unix targets `start_kill()` is
/// already the forceful kill, so the grace period is skipped.
pub async fn terminate(mut child: Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc_kill(pid as i32, SIGTERM);
            }
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
const SIGTERM: i32 = 15;

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig);
}

fn tail_str(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).to_string()
}

/// Reads everything currently readable from stderr without blocking
/// indefinitely; used after a non-zero exit to surface a short tail for
/// logs and `GetSessionStatus`.
pub async fn read_stderr_tail(stderr: &mut (impl tokio::io::AsyncRead + Unpin)) -> String {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_millis(200), stderr.read_to_end(&mut buf)).await;
    tail_str(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_capturing_stdout_returns_program_output() {
        let out = run_capturing_stdout(
            "echo",
            &["hello".to_string()],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn run_capturing_stdout_reports_non_zero_exit() {
        let err = run_capturing_stdout(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            ProcessError::NonZeroExit { status, .. } => assert_eq!(status, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_capturing_stdout_times_out_on_slow_process() {
        let err = run_capturing_stdout(
            "sleep",
            &["5".to_string()],
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn run_with_stdin_capturing_stdout_echoes_input() {
        let out = run_with_stdin_capturing_stdout(
            "cat",
            &[],
            b"piped bytes",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(out, b"piped bytes");
    }
}

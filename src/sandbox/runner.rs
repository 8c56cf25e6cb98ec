use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::time::timeout;
use tokio_util::task::AbortOnDropHandle;

use super::{Launch, SandboxProvider};

/// Appended to a stream that exceeded the capture limit
pub const TRUNCATION_MARKER: &str = "[output truncated]";

/// How long readers may keep draining after the program exited
const DRAIN_GRACE: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Exited with status 0
    Completed { combined_output: String },
    /// Exited non-zero or was killed by a signal other than the deadline
    RuntimeFailure {
        combined_output: String,
        exit_code: Option<i32>,
    },
    /// Deadline reached; the process group was killed
    TimedOut,
}

impl ExecutionOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed { .. } => Some(0),
            Self::RuntimeFailure { exit_code, .. } => *exit_code,
            Self::TimedOut => None,
        }
    }
}

/// Spawns programs through a [`SandboxProvider`], captures both output
/// streams and enforces the wall-clock deadline
pub struct ExecutionRunner {
    provider: Box<dyn SandboxProvider>,
    max_output_bytes: usize,
}

impl ExecutionRunner {
    pub fn new(provider: Box<dyn SandboxProvider>, max_output_bytes: usize) -> Self {
        Self {
            provider,
            max_output_bytes,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Runs `launch` to completion or until its deadline.
    ///
    /// stdout and stderr are drained by two independent tasks so a chatty
    /// program never blocks on a full pipe. The returned output is the stdout
    /// buffer followed by the stderr buffer.
    pub async fn run(&self, launch: &Launch) -> Result<ExecutionOutcome> {
        let mut command = self.provider.prepare(launch)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch `{}`", launch.program))?;
        let pid = child.id();
        log::debug!(
            "Started `{}` as pid {pid:?} ({} sandbox)",
            launch.program,
            self.provider.name()
        );

        let cap = self.max_output_bytes;
        let mut stdout_reader =
            AbortOnDropHandle::new(tokio::spawn(drain(child.stdout.take(), cap)));
        let mut stderr_reader =
            AbortOnDropHandle::new(tokio::spawn(drain(child.stderr.take(), cap)));

        let status = match timeout(launch.timeout, child.wait()).await {
            Ok(status) => status.context("failed to wait for program")?,
            Err(_) => {
                log::info!(
                    "`{}` exceeded {} seconds, killing process group",
                    launch.program,
                    launch.timeout.as_secs()
                );
                terminate(&mut child, pid).await;
                // readers are aborted on drop, closing their pipe ends
                return Ok(ExecutionOutcome::TimedOut);
            }
        };

        let drained = timeout(DRAIN_GRACE, async {
            tokio::join!(&mut stdout_reader, &mut stderr_reader)
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok(results) => results,
            Err(_) => {
                // a leftover descendant still holds the pipes open
                log::warn!("Output pipes still open after exit, killing process group");
                kill_group(pid);
                timeout(DRAIN_GRACE, async {
                    tokio::join!(&mut stdout_reader, &mut stderr_reader)
                })
                .await
                .unwrap_or_else(|_| {
                    log::error!("Output readers did not finish, discarding output");
                    (Ok(Ok(String::new())), Ok(Ok(String::new())))
                })
            }
        };

        let mut combined_output = collect("stdout", stdout);
        combined_output.push_str(&collect("stderr", stderr));

        if status.success() {
            Ok(ExecutionOutcome::Completed { combined_output })
        } else {
            log::debug!("`{}` exited with {status}", launch.program);
            Ok(ExecutionOutcome::RuntimeFailure {
                combined_output,
                exit_code: status.code(),
            })
        }
    }
}

/// Kills the whole process group, then the child itself, and reaps it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.kill().await {
        log::debug!("Kill after group kill: {e}");
    }
    if let Err(e) = child.wait().await {
        log::warn!("Failed to reap killed program: {e}");
    }
}

/// Sends SIGKILL to the process group led by `pid`
pub(crate) fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // SAFETY: signals the process group led by our own child
    if unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) } != 0 {
        log::debug!(
            "Process group {pid} already gone: {}",
            std::io::Error::last_os_error()
        );
    }
}

fn collect(
    name: &str,
    result: Result<std::io::Result<String>, tokio::task::JoinError>,
) -> String {
    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            log::warn!("Failed to read {name}: {e}");
            String::new()
        }
        Err(e) => {
            log::warn!("{name} reader did not finish: {e}");
            String::new()
        }
    }
}

/// Reads a stream to EOF, keeping at most `cap` bytes, and returns it as
/// newline-terminated lines
async fn drain<R: AsyncRead + Unpin>(stream: Option<R>, cap: usize) -> std::io::Result<String> {
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };

    let mut captured = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut truncated = false;
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(captured.len());
        if n > room {
            truncated = true;
        }
        captured.extend_from_slice(&chunk[..n.min(room)]);
    }

    let mut text: String = String::from_utf8_lossy(&captured)
        .lines()
        .flat_map(|line| [line, "\n"])
        .collect();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
        text.push('\n');
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SimpleProvider;
    use std::time::Instant;
    use tempfile::tempdir;

    fn sh(script: &str, dir: &std::path::Path, timeout: Duration) -> Launch {
        Launch {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.to_path_buf(),
            timeout,
        }
    }

    fn runner(cap: usize) -> ExecutionRunner {
        ExecutionRunner::new(Box::new(SimpleProvider), cap)
    }

    #[tokio::test]
    async fn test_stdout_precedes_stderr() {
        let dir = tempdir().unwrap();
        let outcome = runner(1 << 20)
            .run(&sh(
                "echo err-1 >&2; echo out-1; echo err-2 >&2; printf out-2",
                dir.path(),
                Duration::from_secs(10),
            ))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                combined_output: "out-1\nout-2\nerr-1\nerr-2\n".to_string()
            }
        );
        assert_eq!(outcome.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_output() {
        let dir = tempdir().unwrap();
        let outcome = runner(1 << 20)
            .run(&sh(
                "echo partial; echo 'Exception in thread \"main\"' >&2; exit 3",
                dir.path(),
                Duration::from_secs(10),
            ))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFailure {
                combined_output: "partial\nException in thread \"main\"\n".to_string(),
                exit_code: Some(3),
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_the_program() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'; echo started; sleep 30", pid_file.display());

        let start = Instant::now();
        let outcome = runner(1 << 20)
            .run(&sh(&script, dir.path(), Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));

        let pid: libc::pid_t = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // the shell was killed and reaped, so the pid no longer exists
        assert_eq!(unsafe { libc::kill(pid, 0) }, -1);
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams_does_not_block() {
        let dir = tempdir().unwrap();
        let script = "i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done";
        let outcome = runner(1 << 22)
            .run(&sh(script, dir.path(), Duration::from_secs(30)))
            .await
            .unwrap();
        let ExecutionOutcome::Completed { combined_output } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(combined_output.lines().count(), 40000);
        assert!(combined_output.starts_with("line-0\n"));
        assert!(combined_output.ends_with("err-19999\n"));
    }

    #[tokio::test]
    async fn test_capture_is_capped_per_stream() {
        let dir = tempdir().unwrap();
        let script = "i=0; while [ $i -lt 1000 ]; do echo 0123456789; i=$((i+1)); done";
        let outcome = runner(100)
            .run(&sh(script, dir.path(), Duration::from_secs(10)))
            .await
            .unwrap();
        let ExecutionOutcome::Completed { combined_output } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert!(combined_output.ends_with(&format!("{TRUNCATION_MARKER}\n")));
        assert!(combined_output.len() < 100 + TRUNCATION_MARKER.len() + 8);
    }

    #[tokio::test]
    async fn test_leftover_background_process_does_not_hang() {
        let dir = tempdir().unwrap();
        let start = Instant::now();
        let outcome = runner(1 << 20)
            .run(&sh("sleep 30 & echo done", dir.path(), Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                combined_output: "done\n".to_string()
            }
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempdir().unwrap();
        let launch = Launch {
            program: "no-such-runtime-binary".to_string(),
            args: Vec::new(),
            working_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(1),
        };
        assert!(runner(1024).run(&launch).await.is_err());
    }
}

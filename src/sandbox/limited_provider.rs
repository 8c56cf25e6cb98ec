use std::io;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::process::Command;

use crate::config::LimitsConfig;

use super::{Launch, SandboxProvider};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Resource limits resolved for one provider instance
#[derive(Debug, Clone, Copy)]
struct Limits {
    cpu_seconds: u64,
    file_size_bytes: u64,
    open_files: u64,
    address_space_bytes: Option<u64>,
    drop_network: bool,
}

/// A provider that confines programs with POSIX resource limits
///
/// The program starts with a cleared environment (only `PATH`, `JAVA_HOME`
/// and a locale survive, `HOME` and `TMPDIR` point at the working directory)
/// and with CPU time, file size, open file and optionally address-space caps
/// applied between fork and exec. With `drop_network` it also enters fresh
/// user and network namespaces, leaving it without any network interface but
/// loopback.
///
/// Filesystem confinement beyond the working directory convention is left to
/// the deployment (container, dedicated user).
#[derive(Debug)]
pub struct LimitedProvider {
    limits: Limits,
    path: String,
    java_home: Option<String>,
}

impl LimitedProvider {
    pub fn build(config: &LimitsConfig, execution_timeout: Duration) -> Result<Self> {
        let cpu_seconds = config
            .cpu_seconds
            .unwrap_or_else(|| execution_timeout.as_secs().saturating_mul(2).max(1));
        if config.open_files == 0 || config.file_size_bytes == 0 || cpu_seconds == 0 {
            bail!("resource limits must be greater than 0");
        }

        let limits = Limits {
            cpu_seconds,
            file_size_bytes: config.file_size_bytes,
            open_files: config.open_files,
            address_space_bytes: config.memory_bytes,
            drop_network: config.drop_network,
        };
        log::info!("LimitedProvider limits: {limits:?}");

        Ok(Self {
            limits,
            path: std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
            java_home: std::env::var("JAVA_HOME").ok(),
        })
    }
}

impl SandboxProvider for LimitedProvider {
    fn name(&self) -> &'static str {
        "limited"
    }

    fn prepare(&self, launch: &Launch) -> Result<Command> {
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .env_clear()
            .env("PATH", &self.path)
            .env("HOME", &launch.working_dir)
            .env("TMPDIR", &launch.working_dir)
            .env("LANG", "C.UTF-8");
        if let Some(java_home) = &self.java_home {
            command.env("JAVA_HOME", java_home);
        }

        let limits = self.limits;
        // SAFETY: the hook only calls async-signal-safe functions (setrlimit, unshare)
        // and does not allocate.
        unsafe {
            command.pre_exec(move || apply_limits(&limits));
        }

        Ok(command)
    }
}

fn apply_limits(limits: &Limits) -> io::Result<()> {
    set_limit(libc::RLIMIT_CPU, limits.cpu_seconds)?;
    set_limit(libc::RLIMIT_FSIZE, limits.file_size_bytes)?;
    set_limit(libc::RLIMIT_NOFILE, limits.open_files)?;
    if let Some(bytes) = limits.address_space_bytes {
        set_limit(libc::RLIMIT_AS, bytes)?;
    }

    #[cfg(target_os = "linux")]
    {
        // SAFETY: plain syscall on flags, the child is single-threaded after fork
        if limits.drop_network
            && unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) } != 0
        {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

fn set_limit(resource: Resource, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecutionOutcome, ExecutionRunner};
    use tempfile::tempdir;

    fn sh(script: &str, dir: &std::path::Path) -> Launch {
        Launch {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.to_path_buf(),
            timeout: Duration::from_secs(10),
        }
    }

    fn provider() -> LimitedProvider {
        let config = LimitsConfig {
            open_files: 64,
            ..LimitsConfig::default()
        };
        LimitedProvider::build(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_cpu_limit_defaults_to_twice_the_timeout() {
        let provider = provider();
        assert_eq!(provider.limits.cpu_seconds, 10);
        assert_eq!(provider.limits.open_files, 64);
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let config = LimitsConfig {
            open_files: 0,
            ..LimitsConfig::default()
        };
        assert!(LimitedProvider::build(&config, Duration::from_secs(5)).is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_drop_network_leaves_only_loopback() {
        let dir = tempdir().unwrap();
        let config = LimitsConfig {
            drop_network: true,
            ..LimitsConfig::default()
        };
        let provider = LimitedProvider::build(&config, Duration::from_secs(5)).unwrap();
        let runner = ExecutionRunner::new(Box::new(provider), 4096);
        // /proc/net follows the caller's namespace, unlike /sys/class/net
        let script = "tail -n +3 /proc/net/dev | cut -d: -f1 | tr -d ' '";

        let outcome = match runner.run(&sh(script, dir.path())).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let errno = e
                    .root_cause()
                    .downcast_ref::<io::Error>()
                    .and_then(io::Error::raw_os_error);
                if matches!(
                    errno,
                    Some(libc::EPERM | libc::EINVAL | libc::ENOSPC | libc::EUSERS)
                ) {
                    eprintln!("Skipping test: user namespaces unavailable ({e:#})");
                    return;
                }
                panic!("unexpected launch failure: {e:#}");
            }
        };
        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                combined_output: "lo\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_limits_and_environment_apply_to_child() {
        let dir = tempdir().unwrap();
        let runner = ExecutionRunner::new(Box::new(provider()), 4096);
        let script = "ulimit -n; ulimit -t; echo \"$HOME\"; echo \"${CARGO:-unset}\"";

        let outcome = runner.run(&sh(script, dir.path())).await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                combined_output: format!("64\n10\n{}\nunset\n", dir.path().display())
            }
        );
    }
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "java-sandbox", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Wall-clock limit for the executed program, in seconds
    #[arg(long = "execution-timeout", env = "EXECUTION_TIMEOUT")]
    pub execution_timeout: Option<u64>,

    /// Address to bind the HTTP server to
    #[arg(long = "bind-address")]
    pub bind_address: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long = "bind-port", short = 'p')]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration file (if any) and apply command-line overrides
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(seconds) = self.execution_timeout {
            config.sandbox.execution_timeout = Second(seconds);
        }
        if let Some(address) = &self.bind_address {
            config.server.bind_address = Some(address.clone());
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = Some(port);
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("unable to open configuration file {path}"))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("invalid configuration file {path}"))
    }

    pub fn validate(&self) -> Result<()> {
        let sandbox = &self.sandbox;
        if sandbox.execution_timeout.0 == 0 {
            bail!("execution_timeout must be at least 1 second");
        }
        if sandbox.compile_timeout.0 == 0 {
            bail!("compile_timeout must be at least 1 second");
        }
        if sandbox.max_concurrent_executions == 0 {
            bail!("max_concurrent_executions must not be 0");
        }
        if sandbox.javac.is_empty() || sandbox.java.is_empty() {
            bail!("javac and java commands must not be empty");
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root of all workspaces; defaults to the per-user cache directory
    pub build_root: Option<PathBuf>,
    pub deps_dir: PathBuf,
    /// Command run once when `deps_dir` is missing; empty disables the fetch
    pub fetch_command: Vec<String>,
    pub javac: String,
    pub java: String,
    pub java_options: Vec<String>,
    pub execution_timeout: Second,
    pub compile_timeout: Second,
    /// Per-stream capture limit
    pub max_output_bytes: usize,
    pub max_concurrent_executions: usize,
    pub workspace_mode: WorkspaceMode,
    pub keep_workspaces: bool,
    pub isolation: IsolationKind,
    pub limits: LimitsConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            build_root: None,
            deps_dir: PathBuf::from("build/dependencies"),
            fetch_command: vec!["./gradlew".to_string(), "copyDependencies".to_string()],
            javac: "javac".to_string(),
            java: "java".to_string(),
            java_options: Vec::new(),
            execution_timeout: Second(30),
            compile_timeout: Second(30),
            max_output_bytes: 1 << 20,
            max_concurrent_executions: 4,
            workspace_mode: WorkspaceMode::PerRequest,
            keep_workspaces: false,
            isolation: IsolationKind::Limited,
            limits: LimitsConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Resolves the configured build root, falling back to the user cache directory
    pub fn build_root(&self) -> Result<PathBuf> {
        use directories::ProjectDirs;

        if let Some(root) = &self.build_root {
            return Ok(root.clone());
        }

        let proj_dirs = ProjectDirs::from("", "", "java-sandbox")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;
        Ok(proj_dirs.cache_dir().join("sandbox"))
    }
}

/// POSIX resource limits applied by the `limited` isolation mode
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Address-space cap; unset by default since the JVM reserves large virtual ranges
    pub memory_bytes: Option<u64>,
    /// CPU seconds; defaults to twice the execution timeout
    pub cpu_seconds: Option<u64>,
    pub file_size_bytes: u64,
    pub open_files: u64,
    /// Run the program in fresh user and network namespaces
    pub drop_network: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_bytes: None,
            cpu_seconds: None,
            file_size_bytes: 16 << 20,
            open_files: 256,
            drop_network: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Second(pub u64);

impl Second {
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    /// Every request writes directly under the build root
    Shared,
    /// Every request gets its own subdirectory of the build root
    PerRequest,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IsolationKind {
    None,
    Limited,
}

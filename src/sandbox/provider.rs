use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::process::Command;

/// Everything needed to start one program
#[derive(Debug, Clone)]
pub struct Launch {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; also the only directory the program is expected to write to
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

/// Trait for the execution contexts a program can run in
///
/// A provider turns a [`Launch`] into a command ready to spawn, applying
/// whatever confinement it offers. Piping, process grouping and the deadline
/// are handled by the runner and must not be overridden here.
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn prepare(&self, launch: &Launch) -> Result<Command>;
}

use anyhow::Result;
use tokio::process::Command;

use super::{Launch, SandboxProvider};

/// A provider that runs programs without confinement
///
/// SimpleProvider only sets the working directory; the program inherits the
/// service's environment, filesystem view and network. The deadline enforced
/// by the runner is the only protection. Intended for development and trusted
/// environments.
#[derive(Debug, Default)]
pub struct SimpleProvider;

impl SimpleProvider {
    pub fn build() -> Self {
        log::warn!("SimpleProvider provides NO security isolation - use only in trusted environments");
        Self
    }
}

impl SandboxProvider for SimpleProvider {
    fn name(&self) -> &'static str {
        "none"
    }

    fn prepare(&self, launch: &Launch) -> Result<Command> {
        let mut command = Command::new(&launch.program);
        command.args(&launch.args).current_dir(&launch.working_dir);
        Ok(command)
    }
}

mod limited_provider;
mod provider;
mod runner;
mod simple_provider;

// Re-export the trait and common types
pub use limited_provider::LimitedProvider;
pub use provider::{Launch, SandboxProvider};
pub use runner::{ExecutionOutcome, ExecutionRunner, TRUNCATION_MARKER};
pub(crate) use runner::kill_group;
pub use simple_provider::SimpleProvider;

use anyhow::Result;

use crate::config::{IsolationKind, SandboxConfig};

/// Creates the sandbox provider selected by the configuration
///
/// `none` runs programs as plain child processes of the service. `limited`
/// clears the environment and applies POSIX resource limits (and optionally
/// fresh user and network namespaces) before the program starts.
pub fn create_sandbox_provider(config: &SandboxConfig) -> Result<Box<dyn SandboxProvider>> {
    match config.isolation {
        IsolationKind::None => {
            log::info!("Creating SimpleProvider (no isolation)");
            Ok(Box::new(SimpleProvider::build()))
        }
        IsolationKind::Limited => {
            log::info!("Creating LimitedProvider (resource limits)");
            let provider = LimitedProvider::build(
                &config.limits,
                config.execution_timeout.as_duration(),
            )?;
            Ok(Box::new(provider))
        }
    }
}

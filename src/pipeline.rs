use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;

use crate::analyzer::{SourceAnalyzer, TextualAnalyzer, UnitIdentity};
use crate::classpath::{Classpath, ClasspathCache};
use crate::compiler::{CompileOutcome, JavaCompiler};
use crate::config::SandboxConfig;
use crate::response::{self, ExecutionResponse};
use crate::sandbox::{ExecutionRunner, Launch, create_sandbox_provider};
use crate::workspace::{Workspace, WorkspaceBuilder};

/// Compile-and-run pipeline shared by all requests
///
/// Stages run strictly in order (analyze, materialize, resolve classpath,
/// compile, run) and the first failing stage short-circuits. Every outcome,
/// including unexpected errors, ends up as an [`ExecutionResponse`].
pub struct Pipeline {
    analyzer: Box<dyn SourceAnalyzer>,
    workspaces: WorkspaceBuilder,
    classpath: Arc<ClasspathCache>,
    compiler: JavaCompiler,
    runner: ExecutionRunner,
    java: String,
    java_options: Vec<String>,
    execution_timeout: Duration,
    permits: Semaphore,
}

impl Pipeline {
    pub fn build(config: &SandboxConfig) -> Result<Self> {
        let build_root = config.build_root()?;
        std::fs::create_dir_all(&build_root)?;
        let workspaces =
            WorkspaceBuilder::new(&build_root, config.workspace_mode, config.keep_workspaces)?;
        let provider = create_sandbox_provider(config)?;

        log::info!(
            "Pipeline ready: build root {}, dependencies {}, timeout {}s, {} sandbox",
            workspaces.build_root().display(),
            config.deps_dir.display(),
            config.execution_timeout.0,
            provider.name()
        );

        Ok(Self {
            analyzer: Box::new(TextualAnalyzer),
            workspaces,
            classpath: Arc::new(ClasspathCache::new(
                &config.deps_dir,
                config.fetch_command.clone(),
            )),
            compiler: JavaCompiler::new(&config.javac, config.compile_timeout.as_duration()),
            runner: ExecutionRunner::new(provider, config.max_output_bytes),
            java: config.java.clone(),
            java_options: config.java_options.clone(),
            execution_timeout: config.execution_timeout.as_duration(),
            permits: Semaphore::new(config.max_concurrent_executions),
        })
    }

    /// Replaces the source analyzer, e.g. with a real tokenizer
    pub fn with_analyzer(mut self, analyzer: Box<dyn SourceAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Shared classpath cache, exposed for invalidation
    pub fn classpath(&self) -> &Arc<ClasspathCache> {
        &self.classpath
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    /// Compiles and runs one compilation unit. Never fails.
    pub async fn execute(&self, code: &str) -> ExecutionResponse {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return ExecutionResponse::error(e),
        };

        match self.try_execute(code).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Execution pipeline failed: {e:#}");
                ExecutionResponse::error(format!("{e:#}"))
            }
        }
    }

    async fn try_execute(&self, code: &str) -> Result<ExecutionResponse> {
        let identity = self.analyzer.analyze(code);
        log::debug!("Analyzed unit {}", identity.qualified_name());

        let workspace = self.workspaces.materialize(&identity, code).await?;
        let result = self.compile_and_run(&workspace, &identity).await;
        workspace.cleanup().await;
        result
    }

    async fn compile_and_run(
        &self,
        workspace: &Workspace,
        identity: &UnitIdentity,
    ) -> Result<ExecutionResponse> {
        let classpath = self.classpath.resolve().await;

        let outcome = self
            .compiler
            .compile(workspace.source_file(), workspace.root(), &classpath)
            .await?;
        if let CompileOutcome::Failure {
            report,
            diagnostics,
        } = outcome
        {
            log::info!(
                "Compilation of {} failed with {} diagnostic(s)",
                identity.qualified_name(),
                diagnostics.len()
            );
            return Ok(ExecutionResponse::compilation_failed(report));
        }

        let launch = self.launch_for(workspace, identity, &classpath);
        let outcome = self.runner.run(&launch).await?;
        log::info!(
            "Ran {}: exit code {:?}",
            identity.qualified_name(),
            outcome.exit_code()
        );

        Ok(response::from_execution(outcome, self.execution_timeout))
    }

    fn launch_for(
        &self,
        workspace: &Workspace,
        identity: &UnitIdentity,
        classpath: &Classpath,
    ) -> Launch {
        let mut args = self.java_options.clone();
        args.push("-cp".to_string());
        args.push(classpath.with_leading(workspace.root()));
        args.push(identity.qualified_name());

        Launch {
            program: self.java.clone(),
            args,
            working_dir: workspace.root().to_path_buf(),
            timeout: self.execution_timeout,
        }
    }
}

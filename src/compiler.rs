use std::fmt::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::task::AbortOnDropHandle;

use crate::classpath::Classpath;
use crate::sandbox::kill_group;

/// Line number of diagnostics that are not tied to a source position
pub const NO_POSITION: i64 = -1;

static POSITIONED_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>.+?):(?P<line>\d+): (?P<kind>error|warning): (?P<message>.*)$")
        .expect("valid diagnostic header pattern")
});
static POSITIONLESS_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<kind>error|warning|Note): (?P<message>.*)$")
        .expect("valid diagnostic header pattern")
});
static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+ (errors?|warnings?)$").expect("valid summary pattern")
});

/// One compiler message tied to a source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: i64,
    pub message: String,
}

impl Diagnostic {
    pub fn positionless(message: impl Into<String>) -> Self {
        Self {
            line: NO_POSITION,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Compiled; any warnings are kept for logging
    Success { diagnostics: Vec<Diagnostic> },
    Failure {
        diagnostics: Vec<Diagnostic>,
        /// `Line <n>: <message>` per diagnostic, in emission order
        report: String,
    },
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Drives the JDK compiler for a single compilation unit
#[derive(Debug, Clone)]
pub struct JavaCompiler {
    program: String,
    timeout: Duration,
}

impl JavaCompiler {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Compiles `source_file` into `output_dir`.
    ///
    /// Only a failure to launch the compiler is returned as an error; everything
    /// the compiler says, including a timeout, becomes a [`CompileOutcome`].
    pub async fn compile(
        &self,
        source_file: &Path,
        output_dir: &Path,
        classpath: &Classpath,
    ) -> Result<CompileOutcome> {
        let mut command = Command::new(&self.program);
        command.arg("-d").arg(output_dir).args(["-encoding", "UTF-8"]);
        if !classpath.is_empty() {
            command.arg("-classpath").arg(classpath.to_string());
        }
        command
            .arg(source_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        log::debug!("Compiling {} with {}", source_file.display(), self.program);
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch compiler `{}`", self.program))?;
        let pid = child.id();

        let stdout = AbortOnDropHandle::new(tokio::spawn(read_stream(child.stdout.take())));
        let stderr = AbortOnDropHandle::new(tokio::spawn(read_stream(child.stderr.take())));

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(status) => status.context("failed to wait for compiler")?,
            Err(_) => {
                // wrappers around the compiler may have forked helpers
                kill_group(pid);
                if let Err(e) = child.kill().await {
                    log::debug!("Kill after group kill: {e}");
                }
                let diagnostic = Diagnostic::positionless(format!(
                    "Compilation timed out after {} seconds",
                    self.timeout.as_secs()
                ));
                return Ok(CompileOutcome::Failure {
                    report: render_report(std::slice::from_ref(&diagnostic)),
                    diagnostics: vec![diagnostic],
                });
            }
        };

        let mut output = String::new();
        let mut teardown_errors = Vec::new();
        for reader in [stdout, stderr] {
            match reader.await {
                Ok(Ok(text)) => output.push_str(&text),
                Ok(Err(e)) => teardown_errors.push(e.to_string()),
                Err(e) => teardown_errors.push(e.to_string()),
            }
        }

        let mut diagnostics = parse_diagnostics(&output);
        if status.success() {
            for diagnostic in &diagnostics {
                log::debug!("javac line {}: {}", diagnostic.line, diagnostic.message);
            }
            for e in &teardown_errors {
                log::warn!("Error closing diagnostic stream: {e}");
            }
            return Ok(CompileOutcome::Success { diagnostics });
        }

        if diagnostics.is_empty() {
            let raw = output.trim();
            diagnostics.push(Diagnostic::positionless(if raw.is_empty() {
                format!("compiler exited with {status}")
            } else {
                raw.to_string()
            }));
        }

        let mut report = render_report(&diagnostics);
        for e in teardown_errors {
            let _ = write!(report, "Error closing diagnostic stream: {e}");
        }
        Ok(CompileOutcome::Failure {
            diagnostics,
            report,
        })
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses javac's console output.
///
/// A positioned diagnostic is followed by an echo of the offending source line
/// and a caret marker; both are dropped, and indented detail lines after the
/// caret (`symbol:`, `location:`, ...) are folded into the message.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    // true once the echo and caret of the current diagnostic have been consumed
    let mut in_details = false;

    for line in output.lines() {
        if let Some(caps) = POSITIONED_HEADER.captures(line) {
            diagnostics.push(Diagnostic {
                line: caps["line"].parse().unwrap_or(NO_POSITION),
                message: caps["message"].to_string(),
            });
            in_details = false;
            continue;
        }
        if let Some(caps) = POSITIONLESS_HEADER.captures(line) {
            diagnostics.push(Diagnostic::positionless(&caps["message"]));
            in_details = true;
            continue;
        }
        if SUMMARY.is_match(line.trim()) {
            continue;
        }

        let Some(current) = diagnostics.last_mut() else {
            continue;
        };
        if !in_details {
            if line.trim() == "^" {
                in_details = true;
            }
            continue;
        }
        if !line.trim().is_empty() {
            current.message.push('\n');
            current.message.push_str(line.trim_end());
        }
    }

    diagnostics
}

pub fn render_report(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("Line {}: {}\n", d.line, d.message))
        .collect()
}

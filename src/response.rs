use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sandbox::ExecutionOutcome;

pub const STATUS_SUCCESS: &str = "Success";
pub const STATUS_COMPILATION_FAILED: &str = "Compilation failed";
pub const STATUS_ERROR_PREFIX: &str = "Error: ";

/// The only entity crossing the service boundary
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub status: String,
    pub output: Option<String>,
    /// Exit code of the program; absent when it never ran to exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionResponse {
    pub fn success(output: String, exit_code: Option<i32>) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            output: Some(output),
            exit_code,
        }
    }

    pub fn compilation_failed(report: String) -> Self {
        Self {
            status: STATUS_COMPILATION_FAILED.to_string(),
            output: Some(report),
            exit_code: None,
        }
    }

    pub fn error(message: impl Display) -> Self {
        Self {
            status: format!("{STATUS_ERROR_PREFIX}{message}"),
            output: None,
            exit_code: None,
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Self::error(format!(
            "Execution timed out after {} seconds",
            limit.as_secs()
        ))
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Maps a program run onto the response.
///
/// A non-zero exit is still reported as `Success` with the merged output, so
/// existing clients keep working; `exitCode` tells the two apart.
pub fn from_execution(outcome: ExecutionOutcome, limit: Duration) -> ExecutionResponse {
    let exit_code = outcome.exit_code();
    match outcome {
        ExecutionOutcome::Completed { combined_output }
        | ExecutionOutcome::RuntimeFailure {
            combined_output, ..
        } => ExecutionResponse::success(combined_output, exit_code),
        ExecutionOutcome::TimedOut => ExecutionResponse::timed_out(limit),
    }
}

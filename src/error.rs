use actix_web::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::ExecutionResult;

/// Wire-level classification of an execution outcome.
///
/// Absent from the response envelope on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    CompileError,
    RuntimeError,
    Timeout,
    MemoryLimit,
    LimitExceeded,
    UnsupportedLanguage,
    BadRequest,
    Internal,
}

impl ErrorType {
    /// HTTP status for each classification.
    ///
    /// Compile and runtime errors are successful executions with informative
    /// stderr; only meta-failures of the sandbox itself map to HTTP errors.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorType::CompileError | ErrorType::RuntimeError => StatusCode::OK,
            ErrorType::UnsupportedLanguage | ErrorType::BadRequest => StatusCode::BAD_REQUEST,
            ErrorType::LimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorType::MemoryLimit => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorType::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorType::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::CompileError => "compile_error",
            ErrorType::RuntimeError => "runtime_error",
            ErrorType::Timeout => "timeout",
            ErrorType::MemoryLimit => "memory_limit",
            ErrorType::LimitExceeded => "limit_exceeded",
            ErrorType::UnsupportedLanguage => "unsupported_language",
            ErrorType::BadRequest => "bad_request",
            ErrorType::Internal => "internal",
        }
    }
}

/// Classify a completed execution. `None` means a clean run.
///
/// Timeout and OOM dominate the exit code: a killed workload reports a
/// nonzero status that says nothing about the program itself.
pub fn classify(result: &ExecutionResult, compiled: bool) -> Option<ErrorType> {
    if result.timed_out {
        return Some(ErrorType::Timeout);
    }
    if result.oom_killed {
        return Some(ErrorType::MemoryLimit);
    }
    if result.exit_code == 0 {
        return None;
    }
    if compiled && result.stderr.to_lowercase().contains("error") {
        Some(ErrorType::CompileError)
    } else {
        Some(ErrorType::RuntimeError)
    }
}

/// Human-readable message accompanying a classified failure.
pub fn classification_message(error_type: ErrorType, result: &ExecutionResult) -> String {
    match error_type {
        ErrorType::Timeout => format!("execution timed out after {} ms", result.elapsed_ms),
        ErrorType::MemoryLimit => "memory limit exceeded".to_string(),
        ErrorType::CompileError => "compilation failed".to_string(),
        ErrorType::RuntimeError => {
            format!("process exited with status {}", result.exit_code)
        }
        other => other.as_str().to_string(),
    }
}

/// Failures of the execution machinery itself, as opposed to the workload.
///
/// Every variant maps to `internal`: the cause is logged, the client gets a
/// sanitized message with no container ids or host paths.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to provision sandbox: {0}")]
    Provision(String),
    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),
    #[error("sandbox filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

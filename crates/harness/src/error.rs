//! Error types for the deployment harness

use std::path::PathBuf;

use thiserror::Error;

use crate::state::DeploymentState;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid deployment configuration: {0}")]
    Configuration(String),

    #[error("{program} publish exited with exit code {exit_code}\n{output}")]
    BuildFailure {
        program: String,
        exit_code: i32,
        output: String,
    },

    #[error("Host process {} {}", .executable.display(), launch_failure_detail(.exit_code, .reason))]
    LaunchFailure {
        executable: PathBuf,
        exit_code: Option<i32>,
        reason: String,
    },

    #[error("Failed to GET {url} after {attempts} attempts: {}", probe_failure_detail(.status, .transport, .body))]
    ProbeFailure {
        url: String,
        attempts: usize,
        status: Option<u16>,
        body: Option<String>,
        transport: Option<String>,
    },

    #[error("Restore of {application} failed: {reason}")]
    RestoreFailure { application: String, reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

fn launch_failure_detail(exit_code: &Option<i32>, reason: &str) -> String {
    match exit_code {
        Some(code) => format!("exited with code {} or failed to start: {}", code, reason),
        None => format!("failed to start: {}", reason),
    }
}

fn probe_failure_detail(
    status: &Option<u16>,
    transport: &Option<String>,
    body: &Option<String>,
) -> String {
    let mut detail = match (status, transport) {
        (Some(status), _) => format!("status code {}", status),
        (None, Some(transport)) => transport.to_string(),
        (None, None) => "no response".to_string(),
    };
    if let Some(body) = body.as_deref().filter(|b| !b.is_empty()) {
        detail.push('\n');
        detail.push_str(body);
    }
    detail
}

impl HarnessError {
    /// Exit code carried by build and launch failures
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HarnessError::BuildFailure { exit_code, .. } => Some(*exit_code),
            HarnessError::LaunchFailure { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

//! Error taxonomy.
//!
//! [`ExecError`] is what the cluster adapters return. [`HarnessError`] is what
//! the watcher, the scenario, and the driver return; its [`kind`] decides how
//! the driver records the failure.
//!
//! [`kind`]: HarnessError::kind

use crate::types::FailureKind;
use thiserror::Error;

/// Failure talking to the cluster.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{target}: `{command}` exited with {status}: {stderr}")]
    Failed {
        target: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("session to {target} refused: {reason}")]
    SessionRefused { target: String, reason: String },

    #[error("background probe on {target} exited before cancellation ({status})")]
    ProbeExited { target: String, status: String },

    #[error("unexpected output from `{command}`: {reason}")]
    Parse { command: String, reason: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("i/o error on {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a harness step, classified for reporting.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A precondition could not be established.
    #[error("setup failed: {context}: {source}")]
    Setup {
        context: String,
        #[source]
        source: ExecError,
    },

    /// The system under test misbehaved.
    #[error("{0}")]
    Assertion(String),

    /// A remote step inside the body failed.
    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: ExecError,
    },

    /// Teardown could not release a resource.
    #[error("cleanup failed: {context}: {reason}")]
    Cleanup { context: String, reason: String },

    #[error("log watcher cannot {op} while {state}")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },
}

impl HarnessError {
    pub fn setup(context: impl Into<String>, source: ExecError) -> Self {
        HarnessError::Setup {
            context: context.into(),
            source,
        }
    }

    pub fn remote(context: impl Into<String>, source: ExecError) -> Self {
        HarnessError::Remote {
            context: context.into(),
            source,
        }
    }

    pub fn cleanup(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HarnessError::Cleanup {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::Setup { .. } => FailureKind::Setup,
            HarnessError::Cleanup { .. } => FailureKind::Cleanup,
            HarnessError::Assertion(_)
            | HarnessError::Remote { .. }
            | HarnessError::InvalidTransition { .. } => FailureKind::Assertion,
        }
    }
}

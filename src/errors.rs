//! Typed error hierarchy for multispace.
//!
//! - `ClientError`: a single call to the remote service failed
//! - `RunError`: an orchestrated run could not be driven to completion
//! - `Diagnostics`: what the create/destroy/read/update surface hands back

use crate::context::Interrupted;
use crate::tfe::RunStatus;
use std::fmt;
use thiserror::Error;

/// Failures of one remote API call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("resource not found")]
    NotFound,

    #[error("unauthorized: check the API token")]
    Unauthorized,

    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("service discovery failed: {0}")]
    Discovery(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound)
    }
}

/// Failures of an orchestrated run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to {op}: {source}")]
    Client {
        op: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("Run {run_id:?} errored during plan. Please open the web UI to view the error")]
    PlanErrored { run_id: String },

    #[error("Run {run_id:?} errored during apply. Please open the web UI to view the error")]
    ApplyErrored { run_id: String },

    #[error(
        "Maximum retry attempts {max_attempts} reached. Please see the web UI to see any errors during plan or apply."
    )]
    RetryBudgetExhausted { max_attempts: u32 },

    #[error("Run {run_id:?} entered unexpected state \"{status}\", expected applied")]
    UnexpectedState { run_id: String, status: RunStatus },

    #[error("Run cancelled while waiting")]
    Cancelled {
        /// Last run snapshot observed before the wait was interrupted.
        last_known: Option<Box<crate::tfe::Run>>,
    },

    #[error("Deadline exceeded while waiting")]
    DeadlineExceeded {
        last_known: Option<Box<crate::tfe::Run>>,
    },

    #[error("A run cannot be updated in place; destroy and recreate it instead")]
    UpdateNotSupported,

    #[error("Failed to record run identifier: {0}")]
    State(#[source] anyhow::Error),
}

impl RunError {
    pub(crate) fn client(op: &'static str, source: ClientError) -> Self {
        RunError::Client { op, source }
    }

    pub(crate) fn interrupted(reason: Interrupted, last_known: Option<crate::tfe::Run>) -> Self {
        let last_known = last_known.map(Box::new);
        match reason {
            Interrupted::Cancelled => RunError::Cancelled { last_known },
            Interrupted::DeadlineExceeded => RunError::DeadlineExceeded { last_known },
        }
    }

    /// True when the caller gave up, as opposed to the run failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            RunError::Cancelled { .. } | RunError::DeadlineExceeded { .. }
        )
    }

    /// The run snapshot carried by a cancellation, if any.
    pub fn last_known_run(&self) -> Option<&crate::tfe::Run> {
        match self {
            RunError::Cancelled { last_known } | RunError::DeadlineExceeded { last_known } => {
                last_known.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One structured message for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: Option<String>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Diagnostics returned by the upward operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl From<&RunError> for Diagnostic {
    fn from(err: &RunError) -> Self {
        let diagnostic = Diagnostic::error(err.to_string());
        match err {
            RunError::Client { source, .. } => match source {
                ClientError::Transport(inner) => diagnostic.with_detail(inner.to_string()),
                _ => diagnostic,
            },
            RunError::State(inner) => diagnostic.with_detail(format!("{:#}", inner)),
            _ => diagnostic,
        }
    }
}

impl From<RunError> for Diagnostics {
    fn from(err: RunError) -> Self {
        Diagnostics(vec![Diagnostic::from(&err)])
    }
}

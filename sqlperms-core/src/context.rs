//! Run-wide options and the context object threaded through every component.

use crate::audit::AuditRecorder;
use crate::error::SqlPermsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether statements reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Build, log, and audit statements without executing them
    #[default]
    DryRun,
    /// Execute and commit statements
    Live,
}

impl ExecutionMode {
    /// True in dry-run mode.
    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "DRY-RUN (Preview Only)"),
            Self::Live => write!(f, "LIVE (Applying Changes)"),
        }
    }
}

/// How much a dry-run audit record carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditDetail {
    /// Description only for simulated statements
    #[default]
    Standard,
    /// Description and statement text for simulated statements
    Verbose,
}

/// Options for one reconciliation run.
///
/// # Example
/// ```rust
/// use sqlperms_core::{ExecutionMode, RunOptions};
/// use std::time::Duration;
///
/// let options = RunOptions::new(ExecutionMode::Live)
///     .with_statement_timeout(Duration::from_secs(60));
///
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: ExecutionMode,
    pub audit_detail: AuditDetail,
    /// Budget for opening a session
    pub connect_timeout: Duration,
    /// Budget for each statement or existence check
    pub statement_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            audit_detail: AuditDetail::Standard,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(30),
        }
    }
}

impl RunOptions {
    /// Creates options for the given mode with default timeouts.
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Builder method to set audit detail.
    pub fn with_audit_detail(mut self, audit_detail: AuditDetail) -> Self {
        self.audit_detail = audit_detail;
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the per-statement timeout.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Validates option values.
    ///
    /// # Errors
    /// Returns a configuration error for zero timeouts.
    pub fn validate(&self) -> crate::Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(SqlPermsError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }
        if self.statement_timeout.is_zero() {
            return Err(SqlPermsError::configuration(
                "statement_timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Explicit run state passed into every component call.
///
/// Owned by the orchestrator for the lifetime of a run; the audit trail it
/// carries is flushed once when the run ends.
#[derive(Debug)]
pub struct RunContext {
    pub options: RunOptions,
    pub audit: AuditRecorder,
}

impl RunContext {
    /// Creates a context with an empty audit trail.
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            audit: AuditRecorder::new(),
        }
    }

    /// Execution mode of the run.
    pub fn mode(&self) -> ExecutionMode {
        self.options.mode
    }
}

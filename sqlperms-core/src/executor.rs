//! Statement executor: the single place that knows about dry-run and audit.
//!
//! Every mutating statement goes through [`execute`]. In dry-run mode the
//! session is never touched. In live mode the statement runs under the
//! statement timeout. Either way exactly one audit record is appended and
//! failures come back as values.

use crate::audit::AuditRecord;
use crate::context::{AuditDetail, RunContext};
use crate::error::SqlPermsError;
use crate::session::Session;
use crate::statement::Statement;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Result category of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Executed and committed
    Applied,
    /// Would have been executed (dry-run)
    Simulated,
    /// Attempted and rejected, or timed out
    Failed,
    /// Deliberately not attempted (unsupported path)
    Skipped,
}

impl OperationStatus {
    /// Applied and simulated operations count as successes.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Applied | Self::Simulated)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Simulated => write!(f, "simulated"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one executed or simulated statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub status: OperationStatus,
    pub description: String,
    pub statement: String,
    pub error: Option<String>,
}

impl OperationOutcome {
    /// True for applied or simulated outcomes.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Executes (or simulates) one mutating statement.
///
/// Never returns an error: a rejected or timed-out statement yields a
/// [`OperationStatus::Failed`] outcome carrying the server's message.
pub async fn execute(
    ctx: &mut RunContext,
    session: &mut dyn Session,
    statement: &Statement,
    description: &str,
) -> OperationOutcome {
    if ctx.mode().is_dry_run() {
        info!("[DRY-RUN] Would execute: {}", description);
        debug!("[DRY-RUN] SQL: {}", statement);

        let mut record = AuditRecord::new(description, OperationStatus::Simulated);
        if ctx.options.audit_detail == AuditDetail::Verbose {
            record = record.with_sql(statement.sql());
        }
        ctx.audit.record(record);

        return OperationOutcome {
            status: OperationStatus::Simulated,
            description: description.to_string(),
            statement: statement.sql().to_string(),
            error: None,
        };
    }

    let timeout = ctx.options.statement_timeout;
    let result = match tokio::time::timeout(timeout, session.execute(statement)).await {
        Ok(result) => result,
        Err(_) => Err(SqlPermsError::timeout("Statement", timeout)),
    };

    match result {
        Ok(()) => {
            info!("✓ {}", description);
            ctx.audit.record(
                AuditRecord::new(description, OperationStatus::Applied).with_sql(statement.sql()),
            );
            OperationOutcome {
                status: OperationStatus::Applied,
                description: description.to_string(),
                statement: statement.sql().to_string(),
                error: None,
            }
        }
        Err(e) => {
            let message = e.to_string();
            error!("✗ Failed: {}", description);
            error!("  Error: {}", message);
            ctx.audit.record(
                AuditRecord::new(description, OperationStatus::Failed)
                    .with_sql(statement.sql())
                    .with_error(&message),
            );
            OperationOutcome {
                status: OperationStatus::Failed,
                description: description.to_string(),
                statement: statement.sql().to_string(),
                error: Some(message),
            }
        }
    }
}

/// Runs a read-only existence query under the statement timeout.
///
/// Existence checks run in both modes; they never mutate and are not
/// audited on success.
///
/// # Errors
/// Returns the session error, or [`SqlPermsError::Timeout`].
pub async fn query_exists(
    ctx: &RunContext,
    session: &mut dyn Session,
    statement: &Statement,
) -> crate::Result<bool> {
    let timeout = ctx.options.statement_timeout;
    match tokio::time::timeout(timeout, session.exists(statement)).await {
        Ok(result) => result,
        Err(_) => Err(SqlPermsError::timeout("Existence check", timeout)),
    }
}

/// Records a statement that could not even be built (invalid identifier).
///
/// Counts as a failed attempt so the problem is visible in the trail.
pub fn reject(ctx: &mut RunContext, description: &str, error: &SqlPermsError) -> OperationOutcome {
    let message = error.to_string();
    error!("✗ Failed: {}", description);
    error!("  Error: {}", message);
    ctx.audit
        .record(AuditRecord::new(description, OperationStatus::Failed).with_error(&message));
    OperationOutcome {
        status: OperationStatus::Failed,
        description: description.to_string(),
        statement: String::new(),
        error: Some(message),
    }
}

//! Orchestrator: walks servers → databases → entries → roles/grants.
//!
//! Failure isolation boundaries, from the outside in:
//!
//! - a server that cannot be reached is recorded and skipped;
//! - an entry whose login or user cannot be ensured is skipped;
//! - each role membership and each grant succeeds or fails on its own.
//!
//! A session is opened in dry-run mode as well, so existence checks reflect
//! the server's current state; only mutations are suppressed.
//!
//! Only role memberships and grants feed `total_success`/`total_failed`
//! (plus one failure per unreachable server). Login and user provisioning
//! outcomes are visible in the audit trail but not in those totals.

use crate::audit::{AuditRecord, AuditRecorder, AuditSink, AuditTally};
use crate::config::{DatabaseSpec, PermissionEntry, PermissionsConfig, ServerSpec};
use crate::context::{ExecutionMode, RunContext, RunOptions};
use crate::error::SqlPermsError;
use crate::executor::{OperationOutcome, OperationStatus};
use crate::session::{Connector, Session};
use crate::{grants, principals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A server that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFailure {
    pub server: String,
    pub error_message: String,
}

/// Totals for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Role memberships and grants executed and committed
    pub applied: usize,
    /// Role memberships and grants that would have been executed
    pub simulated: usize,
    /// Role memberships and grants that failed
    pub failed: usize,
    /// Servers whose session could not be opened
    pub connection_failures: usize,
    /// Servers walked with an open session
    pub servers_processed: usize,
    /// Entries whose roles/grants were skipped because the login or user could not be ensured
    pub entries_skipped: usize,
    pub failed_servers: Vec<ServerFailure>,
    /// Audit records by status
    pub audit: AuditTally,
    /// Where the audit trail was written, if it was
    pub audit_location: Option<String>,
    /// Why the audit trail could not be written, if it could not
    pub audit_error: Option<String>,
}

impl RunSummary {
    fn new(run_id: Uuid, mode: ExecutionMode) -> Self {
        Self {
            run_id,
            mode,
            started_at: Utc::now(),
            duration_ms: 0,
            applied: 0,
            simulated: 0,
            failed: 0,
            connection_failures: 0,
            servers_processed: 0,
            entries_skipped: 0,
            failed_servers: Vec::new(),
            audit: AuditTally::default(),
            audit_location: None,
            audit_error: None,
        }
    }

    /// Successful role/grant operations (applied or simulated).
    pub fn total_success(&self) -> usize {
        self.applied + self.simulated
    }

    /// Failed role/grant operations plus unreachable servers.
    pub fn total_failed(&self) -> usize {
        self.failed + self.connection_failures
    }

    /// True when the process should exit non-zero.
    pub fn has_failures(&self) -> bool {
        self.total_failed() > 0
    }

    fn count(&mut self, outcome: &OperationOutcome) {
        match outcome.status {
            OperationStatus::Applied => self.applied += 1,
            OperationStatus::Simulated => self.simulated += 1,
            OperationStatus::Failed | OperationStatus::Skipped => self.failed += 1,
        }
    }
}

/// Drives a reconciliation run over a configuration tree.
pub struct Reconciler<C> {
    connector: C,
    options: RunOptions,
}

impl<C: Connector> Reconciler<C> {
    /// Creates a reconciler that opens sessions through `connector`.
    pub fn new(connector: C, options: RunOptions) -> Self {
        Self { connector, options }
    }

    /// Run options in effect.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Walks the configuration and flushes the audit trail through `sink`.
    ///
    /// A flush failure is logged and reported in the summary; the run
    /// itself still counts as completed.
    pub async fn run(&self, config: &PermissionsConfig, sink: &dyn AuditSink) -> RunSummary {
        let (mut summary, audit) = self.reconcile(config).await;

        match audit.flush(sink).await {
            Ok(Some(location)) => {
                info!("Audit log exported to: {}", location);
                summary.audit_location = Some(location);
            }
            Ok(None) => info!("No operations recorded; audit log not written"),
            Err(e) => {
                error!("Failed to export audit log: {}", e);
                summary.audit_error = Some(e.to_string());
            }
        }

        summary
    }

    /// Walks the configuration and returns the summary with the unflushed trail.
    pub async fn reconcile(&self, config: &PermissionsConfig) -> (RunSummary, AuditRecorder) {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut ctx = RunContext::new(self.options.clone());
        let mut summary = RunSummary::new(run_id, ctx.mode());

        info!("{}", "=".repeat(80));
        info!("SQL Server Permissions Manager (run {})", run_id);
        info!("{}", "=".repeat(80));
        info!("Mode: {}", ctx.mode());

        for server in &config.servers {
            self.process_server(&mut ctx, &mut summary, server).await;
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        summary.audit = ctx.audit.tally();
        (summary, ctx.audit)
    }

    /// Opens and closes a session to every server without reconciling.
    pub async fn test_connections(&self, config: &PermissionsConfig) -> Vec<(String, crate::Result<()>)> {
        let mut results = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let result = match self.open_session(server).await {
                Ok(session) => session.close().await,
                Err(e) => Err(e),
            };
            results.push((server.name.clone(), result));
        }
        results
    }

    async fn open_session(&self, server: &ServerSpec) -> crate::Result<Box<dyn Session>> {
        let timeout = self.options.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect(server)).await {
            Ok(result) => result,
            Err(_) => Err(SqlPermsError::connection(
                &server.name,
                SqlPermsError::timeout("Connect", timeout).to_string(),
            )),
        }
    }

    async fn process_server(&self, ctx: &mut RunContext, summary: &mut RunSummary, server: &ServerSpec) {
        info!("--- Processing Server: {} ---", server.name);

        let mut session = match self.open_session(server).await {
            Ok(session) => session,
            Err(e) => {
                let message = e.to_string();
                error!("✗ Failed to connect to {}: {}", server.name, message);
                ctx.audit.record(
                    AuditRecord::new(format!("Connect to server: {}", server.name), OperationStatus::Failed)
                        .with_error(&message),
                );
                summary.connection_failures += 1;
                summary.failed_servers.push(ServerFailure {
                    server: server.name.clone(),
                    error_message: message,
                });
                return;
            }
        };
        info!("✓ Connected to {} via {}", server.name, self.connector.describe());
        summary.servers_processed += 1;

        for database in &server.databases {
            process_database(ctx, summary, session.as_mut(), database).await;
        }

        match session.close().await {
            Ok(()) => info!("✓ Disconnected from {}", server.name),
            Err(e) => warn!("Session close for {} reported: {}", server.name, e),
        }
    }
}

async fn process_database(
    ctx: &mut RunContext,
    summary: &mut RunSummary,
    session: &mut dyn Session,
    database: &DatabaseSpec,
) {
    info!("  Database: {}", database.name);

    for entry in &database.permissions {
        process_entry(ctx, summary, session, &database.name, entry).await;
    }
}

async fn process_entry(
    ctx: &mut RunContext,
    summary: &mut RunSummary,
    session: &mut dyn Session,
    database: &str,
    entry: &PermissionEntry,
) {
    let login = entry.login.as_str();
    let user = entry.effective_user();

    if !principals::ensure_login(ctx, session, login, entry.login_type).await {
        warn!("Skipping roles and grants for {} in {}: login not available", login, database);
        summary.entries_skipped += 1;
        return;
    }

    if !principals::ensure_database_user(ctx, session, database, login, user).await {
        warn!("Skipping roles and grants for {} in {}: user not available", user, database);
        summary.entries_skipped += 1;
        return;
    }

    for role in &entry.roles {
        let outcome = grants::add_role_member(ctx, session, database, user, role).await;
        summary.count(&outcome);
    }

    for grant in &entry.grants {
        let outcome = grants::grant_permission(
            ctx,
            session,
            database,
            user,
            &grant.permission,
            grant.object.as_deref(),
        )
        .await;
        summary.count(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_totals() {
        let mut summary = RunSummary::new(Uuid::new_v4(), ExecutionMode::Live);
        summary.applied = 3;
        summary.simulated = 0;
        summary.failed = 1;
        summary.connection_failures = 2;

        assert_eq!(summary.total_success(), 3);
        assert_eq!(summary.total_failed(), 3);
        assert!(summary.has_failures());
    }

    #[test]
    fn test_empty_summary_has_no_failures() {
        let summary = RunSummary::new(Uuid::new_v4(), ExecutionMode::DryRun);
        assert_eq!(summary.total_success(), 0);
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = RunSummary::new(Uuid::new_v4(), ExecutionMode::DryRun);
        let outcome = |status| OperationOutcome {
            status,
            description: String::new(),
            statement: String::new(),
            error: None,
        };

        summary.count(&outcome(OperationStatus::Simulated));
        summary.count(&outcome(OperationStatus::Simulated));
        summary.count(&outcome(OperationStatus::Failed));

        assert_eq!(summary.simulated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.applied, 0);
    }
}

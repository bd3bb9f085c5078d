//! Core engine for reconciling SQL Server permissions against a declarative
//! configuration.
//!
//! A configuration lists servers, their databases, and for each database the
//! principals that must exist together with their role memberships and
//! permission grants. The [`Reconciler`] walks that tree and issues only the
//! statements needed to close the gap, in dry-run unless told otherwise.
//!
//! # Safety Guarantees
//! - Dry-run is the default [`ExecutionMode`]; it never issues a mutating statement
//! - Every attempted change produces exactly one [`AuditRecord`]
//! - Identifiers are validated and bracket-quoted before reaching SQL text
//! - Passwords are zeroized on drop and never logged
//!
//! # Architecture
//! - [`Session`]/[`Connector`] abstract the database connection (SQL Server
//!   via tiberius behind the `mssql` feature)
//! - [`executor`] is the only place aware of dry-run and of the audit trail
//! - [`principals`] and [`grants`] build on it; [`reconcile`] orchestrates

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod grants;
pub mod logging;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod principals;
pub mod reconcile;
pub mod security;
pub mod session;
pub mod statement;
pub mod validation;

// Re-export commonly used types
pub use audit::{AuditRecord, AuditRecorder, AuditSink, AuditTally, JsonFileSink};
pub use config::{
    AuthMode, DatabaseSpec, Grant, LoginKind, PermissionEntry, PermissionsConfig, ServerSpec,
};
pub use context::{AuditDetail, ExecutionMode, RunContext, RunOptions};
pub use error::{Result, SqlPermsError};
pub use executor::{OperationOutcome, OperationStatus};
pub use logging::{LogFormat, LoggingConfig, init_logging};
#[cfg(feature = "mssql")]
pub use mssql::MssqlConnector;
pub use reconcile::{Reconciler, RunSummary, ServerFailure};
pub use security::Credentials;
pub use session::{Connector, Session};
pub use statement::Statement;
pub use validation::ValidationError;

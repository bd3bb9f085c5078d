//! Principal reconciler: server logins and database users.
//!
//! Both operations are create-if-absent. An existing principal is a no-op
//! returning `true` with no statement issued, so running them twice against
//! the same state produces at most one mutation.

use crate::audit::AuditRecord;
use crate::config::LoginKind;
use crate::context::RunContext;
use crate::executor::{self, OperationStatus};
use crate::session::Session;
use crate::statement;
use tracing::{debug, error, warn};

/// Database user name for a login: the part after the last `\`.
///
/// `DOMAIN\svc_app` → `svc_app`; `svc_app` → `svc_app`.
pub fn derive_user_name(login: &str) -> &str {
    login.rsplit_once('\\').map_or(login, |(_, user)| user)
}

fn record_check_failure(ctx: &mut RunContext, description: &str, sql: &str, message: &str) {
    error!("✗ Failed: {}", description);
    error!("  Error: {}", message);
    ctx.audit.record(
        AuditRecord::new(description, OperationStatus::Failed)
            .with_sql(sql)
            .with_error(message),
    );
}

/// Ensures a server login exists.
///
/// Returns `true` when the login already exists or was created (or would be,
/// in dry-run). Returns `false` when the existence check fails, when
/// creation fails, and for absent SQL logins, whose creation is not
/// supported: callers skip the entry rather than abort.
pub async fn ensure_login(
    ctx: &mut RunContext,
    session: &mut dyn Session,
    login: &str,
    kind: LoginKind,
) -> bool {
    let check = statement::login_exists(login);
    match executor::query_exists(ctx, session, &check).await {
        Ok(true) => {
            debug!("Login already exists: {}", login);
            return true;
        }
        Ok(false) => {}
        Err(e) => {
            let description = format!("Check login exists: {}", login);
            record_check_failure(ctx, &description, check.sql(), &e.to_string());
            return false;
        }
    }

    let description = format!("Create login: {}", login);
    match kind {
        LoginKind::Windows => match statement::create_windows_login(login) {
            Ok(create) => executor::execute(ctx, session, &create, &description)
                .await
                .is_success(),
            Err(e) => executor::reject(ctx, &description, &e).is_success(),
        },
        LoginKind::Sql => {
            warn!("SQL login creation not implemented: {}", login);
            ctx.audit.record(
                AuditRecord::new(description, OperationStatus::Skipped)
                    .with_error("SQL login creation is not supported; create the login manually"),
            );
            false
        }
    }
}

/// Ensures `user` exists in `database`, mapped to `login`.
///
/// Returns `true` when the user already exists or was created (or would be,
/// in dry-run); `false` when the check or the creation fails.
pub async fn ensure_database_user(
    ctx: &mut RunContext,
    session: &mut dyn Session,
    database: &str,
    login: &str,
    user: &str,
) -> bool {
    let description = format!("Create user '{}' in database '{}'", user, database);

    let check = match statement::user_exists(database, user) {
        Ok(check) => check,
        Err(e) => return executor::reject(ctx, &description, &e).is_success(),
    };

    match executor::query_exists(ctx, session, &check).await {
        Ok(true) => {
            debug!("User already exists in {}: {}", database, user);
            return true;
        }
        Ok(false) => {}
        Err(e) => {
            let check_description = format!("Check user '{}' exists in database '{}'", user, database);
            record_check_failure(ctx, &check_description, check.sql(), &e.to_string());
            return false;
        }
    }

    match statement::create_user(database, login, user) {
        Ok(create) => executor::execute(ctx, session, &create, &description)
            .await
            .is_success(),
        Err(e) => executor::reject(ctx, &description, &e).is_success(),
    }
}

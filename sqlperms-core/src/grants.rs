//! Grant applier: role memberships and permission grants.
//!
//! One statement per call and no existence checks. Re-adding a member or
//! re-granting a permission is accepted by the server, so the outcome is
//! purely whether the statement succeeded.

use crate::context::RunContext;
use crate::executor::{self, OperationOutcome};
use crate::session::Session;
use crate::statement;

/// Adds `user` to `role` in `database`.
pub async fn add_role_member(
    ctx: &mut RunContext,
    session: &mut dyn Session,
    database: &str,
    user: &str,
    role: &str,
) -> OperationOutcome {
    let description = format!("Add '{}' to role '{}' in database '{}'", user, role, database);
    match statement::add_role_member(database, user, role) {
        Ok(sql) => executor::execute(ctx, session, &sql, &description).await,
        Err(e) => executor::reject(ctx, &description, &e),
    }
}

/// Grants `permission` to `user`, on `object` when given, else database-wide.
pub async fn grant_permission(
    ctx: &mut RunContext,
    session: &mut dyn Session,
    database: &str,
    user: &str,
    permission: &str,
    object: Option<&str>,
) -> OperationOutcome {
    let description = match object {
        Some(object) => format!(
            "Grant {} on {} to '{}' in '{}'",
            permission, object, user, database
        ),
        None => format!("Grant {} to '{}' in '{}'", permission, user, database),
    };

    match statement::grant(database, user, permission, object) {
        Ok(sql) => executor::execute(ctx, session, &sql, &description).await,
        Err(e) => executor::reject(ctx, &description, &e),
    }
}

//! Construction of every statement the engine sends to a server.
//!
//! Existence checks bind the principal name as a parameter (`@P1`).
//! DDL cannot take parameters for names, so those statements interpolate
//! identifiers only after [`crate::security`] has validated and quoted them.
//! Database-scoped statements are prefixed with `USE [db];` and sent as one
//! batch.

use crate::Result;
use crate::security::{normalize_permission, quote_identifier, quote_object_name};

/// A SQL statement and its positional string parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<String>,
}

impl Statement {
    /// A statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Builder method to bind the next positional parameter (`@P1`, `@P2`, ...).
    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Statement text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameter values, in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Query returning a row when a server principal named `@P1` exists.
pub fn login_exists(login: &str) -> Statement {
    Statement::new("SELECT name FROM sys.server_principals WHERE name = @P1").bind(login)
}

/// `CREATE LOGIN [login] FROM WINDOWS`
///
/// # Errors
/// Returns an identifier error if the login fails validation.
pub fn create_windows_login(login: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "CREATE LOGIN {} FROM WINDOWS",
        quote_identifier("login", login)?
    )))
}

/// Query returning a row when database principal `@P1` exists in `database`.
///
/// # Errors
/// Returns an identifier error if the database name fails validation.
pub fn user_exists(database: &str, user: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "SELECT name FROM {}.sys.database_principals WHERE name = @P1",
        quote_identifier("database", database)?
    ))
    .bind(user))
}

/// `USE [db]; CREATE USER [user] FOR LOGIN [login]`
///
/// # Errors
/// Returns an identifier error if any name fails validation.
pub fn create_user(database: &str, login: &str, user: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "USE {};\nCREATE USER {} FOR LOGIN {}",
        quote_identifier("database", database)?,
        quote_identifier("user", user)?,
        quote_identifier("login", login)?
    )))
}

/// `USE [db]; ALTER ROLE [role] ADD MEMBER [user]`
///
/// # Errors
/// Returns an identifier error if any name fails validation.
pub fn add_role_member(database: &str, user: &str, role: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "USE {};\nALTER ROLE {} ADD MEMBER {}",
        quote_identifier("database", database)?,
        quote_identifier("role", role)?,
        quote_identifier("user", user)?
    )))
}

/// `USE [db]; GRANT <PERM> [ON <object>] TO [user]`
///
/// # Errors
/// Returns an identifier error if the permission, object, or any name fails
/// validation.
pub fn grant(database: &str, user: &str, permission: &str, object: Option<&str>) -> Result<Statement> {
    let database = quote_identifier("database", database)?;
    let permission = normalize_permission(permission)?;
    let user = quote_identifier("user", user)?;

    let sql = match object {
        Some(object) => format!(
            "USE {};\nGRANT {} ON {} TO {}",
            database,
            permission,
            quote_object_name(object)?,
            user
        ),
        None => format!("USE {};\nGRANT {} TO {}", database, permission, user),
    };

    Ok(Statement::new(sql))
}

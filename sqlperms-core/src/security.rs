//! Credential handling and identifier safety.
//!
//! Names that end up inside DDL (logins, users, roles, databases, objects)
//! cannot be bound as parameters, so they are checked against an allow-list
//! and bracket-quoted before they are interpolated. Permission verbs are
//! restricted to words of ASCII letters.

use crate::error::SqlPermsError;
use regex::Regex;
use std::sync::OnceLock;
use zeroize::{Zeroize, Zeroizing};

/// Maximum length of a SQL Server `sysname`.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Secure credential container that automatically zeros memory on drop
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    pub username: Zeroizing<String>,
    pub password: Zeroizing<Option<String>>,
}

impl Credentials {
    /// Creates new credentials with automatic memory zeroing
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    /// Gets the username (still protected by Zeroizing)
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Gets the password, if any
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Checks if password is present without exposing it
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &*self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Pre-compiled allow-list patterns for names that are interpolated into SQL.
///
/// Uses `OnceLock` for thread-safe lazy initialization.
pub struct IdentifierPatterns {
    /// Principals, roles, databases: letters, digits, and the punctuation
    /// that shows up in Windows, SQL, and Entra principal names
    pub identifier: Regex,
    /// One part of a dotted object name (no '.')
    pub object_part: Regex,
    /// Upper-case permission verbs, single-space separated
    pub permission: Regex,
}

impl IdentifierPatterns {
    /// Gets the singleton instance of pre-compiled patterns.
    pub fn instance() -> &'static Self {
        static PATTERNS: OnceLock<IdentifierPatterns> = OnceLock::new();
        PATTERNS.get_or_init(Self::compile)
    }

    #[allow(clippy::expect_used)]
    fn compile() -> Self {
        Self {
            identifier: Regex::new(r"^[A-Za-z0-9_@#$\\. -]+$").expect("Invalid identifier pattern"),
            object_part: Regex::new(r"^[A-Za-z0-9_@#$ -]+$").expect("Invalid object pattern"),
            permission: Regex::new(r"^[A-Z]+( [A-Z]+)*$").expect("Invalid permission pattern"),
        }
    }
}

/// Validates a principal, role, or database name.
///
/// # Errors
/// Returns [`SqlPermsError::InvalidIdentifier`] when the name is empty, too
/// long, padded with whitespace, or contains a character outside the
/// allow-list.
pub fn validate_identifier(kind: &'static str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(SqlPermsError::invalid_identifier(kind, value, "must not be empty"));
    }
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(SqlPermsError::invalid_identifier(
            kind,
            value,
            format!("longer than {} characters", MAX_IDENTIFIER_LEN),
        ));
    }
    if value.trim() != value {
        return Err(SqlPermsError::invalid_identifier(
            kind,
            value,
            "has leading or trailing whitespace",
        ));
    }
    if !IdentifierPatterns::instance().identifier.is_match(value) {
        return Err(SqlPermsError::invalid_identifier(
            kind,
            value,
            "contains characters outside [A-Za-z0-9_@#$\\. -]",
        ));
    }
    Ok(())
}

/// Validates and bracket-quotes a name: `svc_app` → `[svc_app]`.
///
/// # Errors
/// See [`validate_identifier`].
pub fn quote_identifier(kind: &'static str, value: &str) -> crate::Result<String> {
    validate_identifier(kind, value)?;
    Ok(format!("[{}]", value))
}

/// Validates and quotes a one to three part object name.
///
/// `dbo.uspGetData` → `[dbo].[uspGetData]`. Parts that are already
/// bracketed are accepted as long as their content passes the allow-list.
///
/// # Errors
/// Returns [`SqlPermsError::InvalidIdentifier`] for empty parts, more than
/// three parts, or disallowed characters.
pub fn quote_object_name(value: &str) -> crate::Result<String> {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() > 3 {
        return Err(SqlPermsError::invalid_identifier(
            "object",
            value,
            "has more than three name parts",
        ));
    }

    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        let inner = part
            .strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .unwrap_or(part);
        if inner.is_empty() {
            return Err(SqlPermsError::invalid_identifier(
                "object",
                value,
                "has an empty name part",
            ));
        }
        if inner.chars().count() > MAX_IDENTIFIER_LEN || !IdentifierPatterns::instance().object_part.is_match(inner) {
            return Err(SqlPermsError::invalid_identifier(
                "object",
                value,
                format!("name part '{}' is not allowed", inner),
            ));
        }
        quoted.push(format!("[{}]", inner));
    }

    Ok(quoted.join("."))
}

/// Normalizes a permission verb to upper case and validates it.
///
/// # Errors
/// Returns [`SqlPermsError::InvalidIdentifier`] unless the verb is one or
/// more words of ASCII letters separated by single spaces.
pub fn normalize_permission(value: &str) -> crate::Result<String> {
    let upper = value.trim().to_ascii_uppercase();
    if !IdentifierPatterns::instance().permission.is_match(&upper) {
        return Err(SqlPermsError::invalid_identifier(
            "permission",
            value,
            "must be words of letters such as SELECT or VIEW DEFINITION",
        ));
    }
    Ok(upper)
}

//! Declarative permissions configuration.
//!
//! The configuration tree is read once at startup and is immutable for the
//! run: servers own databases, databases own permission entries, entries own
//! roles and grants. Loading goes through three gates, and every problem
//! found is reported together in a single configuration error:
//!
//! 1. JSON parsing and the embedded JSON Schema ([`crate::validation`])
//! 2. Deserialization into the typed tree below
//! 3. Semantic checks ([`PermissionsConfig::validate`]): identifier
//!    allow-lists, derivable user names, SQL authentication credentials

use crate::error::SqlPermsError;
use crate::principals::derive_user_name;
use crate::security::{Credentials, normalize_permission, quote_object_name, validate_identifier};
use crate::{Result, validation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use zeroize::Zeroize;

/// How the tool authenticates to a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthMode {
    /// Integrated (Windows) authentication as the current process identity
    #[default]
    Windows,
    /// SQL Server authentication with username and password
    Sql,
}

/// Kind of login a permission entry refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LoginKind {
    /// `CREATE LOGIN [..] FROM WINDOWS`
    #[default]
    Windows,
    /// Password-based SQL login (creation not supported)
    Sql,
}

fn parse_mode(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "windows" => Some(true),
        "sql" => Some(false),
        _ => None,
    }
}

impl TryFrom<String> for AuthMode {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match parse_mode(&value) {
            Some(true) => Ok(Self::Windows),
            Some(false) => Ok(Self::Sql),
            None => Err(format!("unknown auth_type '{}', expected windows or sql", value)),
        }
    }
}

impl From<AuthMode> for String {
    fn from(value: AuthMode) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Sql => write!(f, "sql"),
        }
    }
}

impl TryFrom<String> for LoginKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match parse_mode(&value) {
            Some(true) => Ok(Self::Windows),
            Some(false) => Ok(Self::Sql),
            None => Err(format!("unknown login_type '{}', expected windows or sql", value)),
        }
    }
}

impl From<LoginKind> for String {
    fn from(value: LoginKind) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for LoginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Sql => write!(f, "sql"),
        }
    }
}

/// Root of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    pub servers: Vec<ServerSpec>,
}

/// One SQL Server instance and the databases to reconcile on it.
///
/// # Security
/// `Debug` never prints the password, and the password is zeroed on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// `host`, `host,port`, or `host\instance`
    pub name: String,
    #[serde(default)]
    pub auth_type: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    password: Option<String>,
    /// Environment variable to read the password from when `password` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// TCP port, overriding any port given in `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub trust_server_certificate: bool,
    #[serde(default)]
    pub databases: Vec<DatabaseSpec>,
}

impl Drop for ServerSpec {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl std::fmt::Debug for ServerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSpec")
            .field("name", &self.name)
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("password_env", &self.password_env)
            .field("port", &self.port)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("databases", &self.databases)
            .finish()
    }
}

impl ServerSpec {
    /// Creates a Windows-authenticated server with no databases.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_type: AuthMode::Windows,
            username: None,
            password: None,
            password_env: None,
            port: None,
            trust_server_certificate: false,
            databases: Vec::new(),
        }
    }

    /// Builder method to switch to SQL authentication.
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth_type = AuthMode::Sql;
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Builder method to add a database.
    pub fn with_database(mut self, database: DatabaseSpec) -> Self {
        self.databases.push(database);
        self
    }

    /// Resolves SQL authentication credentials.
    ///
    /// Returns `Ok(None)` for Windows authentication. The password comes
    /// from the configuration file, or from `password_env` when the file
    /// has none.
    ///
    /// # Errors
    /// Returns a configuration error when SQL authentication is selected and
    /// no username or password can be found.
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        if self.auth_type == AuthMode::Windows {
            return Ok(None);
        }

        let username = self.username.clone().ok_or_else(|| {
            SqlPermsError::configuration(format!(
                "server '{}' uses sql authentication but has no username",
                self.name
            ))
        })?;

        let password = match (&self.password, &self.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                SqlPermsError::configuration(format!(
                    "server '{}': environment variable {} is not set",
                    self.name, var
                ))
            })?,
            (None, None) => {
                return Err(SqlPermsError::configuration(format!(
                    "server '{}' uses sql authentication but has no password or password_env",
                    self.name
                )));
            }
        };

        Ok(Some(Credentials::new(username, Some(password))))
    }
}

/// One database on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

impl DatabaseSpec {
    /// Creates a database with no permission entries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
        }
    }

    /// Builder method to add a permission entry.
    pub fn with_entry(mut self, entry: PermissionEntry) -> Self {
        self.permissions.push(entry);
        self
    }
}

/// The desired state for one login within one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Login name, possibly domain-qualified (`DOMAIN\svc_app`)
    pub login: String,
    /// Database user name; derived from `login` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub login_type: LoginKind,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl PermissionEntry {
    /// Creates a Windows login entry with no roles or grants.
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            user: None,
            login_type: LoginKind::Windows,
            roles: Vec::new(),
            grants: Vec::new(),
        }
    }

    /// Builder method to set an explicit user name.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder method to set the login kind.
    pub fn with_login_type(mut self, login_type: LoginKind) -> Self {
        self.login_type = login_type;
        self
    }

    /// Builder method to add a role membership.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Builder method to add a grant.
    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    /// The database user name this entry reconciles.
    pub fn effective_user(&self) -> &str {
        self.user
            .as_deref()
            .unwrap_or_else(|| derive_user_name(&self.login))
    }
}

/// A permission verb, optionally scoped to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub permission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

impl Grant {
    /// Database-wide grant.
    pub fn database_wide(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            object: None,
        }
    }

    /// Object-scoped grant.
    pub fn on_object(permission: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            object: Some(object.into()),
        }
    }
}

impl PermissionsConfig {
    /// Reads, validates, and parses a configuration file.
    ///
    /// # Errors
    /// Returns [`SqlPermsError::Configuration`] for unreadable files, invalid
    /// JSON, schema violations, and semantic problems.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SqlPermsError::configuration(format!(
                "Configuration file not readable: {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_json_str(&text)?;
        tracing::info!("Configuration loaded from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    /// See [`PermissionsConfig::load`].
    pub fn from_json_str(text: &str) -> Result<Self> {
        let document: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SqlPermsError::configuration(format!("Invalid JSON in configuration file: {}", e)))?;

        validation::validate_config_document(&document)
            .map_err(|e| SqlPermsError::configuration(e.to_string()))?;

        let config: Self = serde_json::from_value(document)
            .map_err(|e| SqlPermsError::configuration(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks every name that will reach SQL text, plus authentication settings.
    ///
    /// # Errors
    /// Returns one configuration error listing every problem, each prefixed
    /// with its location (`servers[0].databases[1].permissions[0].login`).
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for (s, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                problems.push(format!("servers[{}].name: must not be empty", s));
            }
            if let Err(e) = server.check_auth_fields() {
                problems.push(format!("servers[{}]: {}", s, e));
            }

            for (d, database) in server.databases.iter().enumerate() {
                let db_path = format!("servers[{}].databases[{}]", s, d);
                if let Err(e) = validate_identifier("database", &database.name) {
                    problems.push(format!("{}.name: {}", db_path, e));
                }

                for (p, entry) in database.permissions.iter().enumerate() {
                    let path = format!("{}.permissions[{}]", db_path, p);
                    entry.collect_problems(&path, &mut problems);
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SqlPermsError::configuration(format!(
                "{} problem(s) found:\n  {}",
                problems.len(),
                problems.join("\n  ")
            )))
        }
    }

    /// Number of permission entries across all servers and databases.
    pub fn entry_count(&self) -> usize {
        self.servers
            .iter()
            .flat_map(|s| &s.databases)
            .map(|d| d.permissions.len())
            .sum()
    }

    /// Number of role memberships and grants the configuration asks for.
    pub fn operation_count(&self) -> usize {
        self.servers
            .iter()
            .flat_map(|s| &s.databases)
            .flat_map(|d| &d.permissions)
            .map(|e| e.roles.len() + e.grants.len())
            .sum()
    }
}

impl ServerSpec {
    // Environment lookups are deferred to connect time; only presence is checked.
    fn check_auth_fields(&self) -> std::result::Result<(), String> {
        if self.auth_type == AuthMode::Sql {
            if self.username.as_deref().is_none_or(str::is_empty) {
                return Err("sql authentication requires a username".to_string());
            }
            if self.password.is_none() && self.password_env.is_none() {
                return Err("sql authentication requires password or password_env".to_string());
            }
        }
        Ok(())
    }
}

impl PermissionEntry {
    fn collect_problems(&self, path: &str, problems: &mut Vec<String>) {
        if let Err(e) = validate_identifier("login", &self.login) {
            problems.push(format!("{}.login: {}", path, e));
        }
        if let Err(e) = validate_identifier("user", self.effective_user()) {
            problems.push(format!("{}.user: {}", path, e));
        }
        for (r, role) in self.roles.iter().enumerate() {
            if let Err(e) = validate_identifier("role", role) {
                problems.push(format!("{}.roles[{}]: {}", path, r, e));
            }
        }
        for (g, grant) in self.grants.iter().enumerate() {
            if let Err(e) = normalize_permission(&grant.permission) {
                problems.push(format!("{}.grants[{}].permission: {}", path, g, e));
            }
            if let Some(object) = &grant.object
                && let Err(e) = quote_object_name(object)
            {
                problems.push(format!("{}.grants[{}].object: {}", path, g, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "servers": [
            {
                "name": "SQL-SERVER-01",
                "auth_type": "windows",
                "databases": [
                    {
                        "name": "AppDatabase",
                        "permissions": [
                            {
                                "login": "DOMAIN\\AppUser",
                                "user": "AppUser",
                                "login_type": "windows",
                                "roles": ["db_datareader", "db_datawriter"],
                                "grants": [
                                    {"permission": "EXECUTE", "object": "dbo.uspGetData"}
                                ]
                            }
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config = PermissionsConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 1);

        let server = &config.servers[0];
        assert_eq!(server.name, "SQL-SERVER-01");
        assert_eq!(server.auth_type, AuthMode::Windows);

        let entry = &server.databases[0].permissions[0];
        assert_eq!(entry.login, r"DOMAIN\AppUser");
        assert_eq!(entry.effective_user(), "AppUser");
        assert_eq!(entry.roles, vec!["db_datareader", "db_datawriter"]);
        assert_eq!(
            entry.grants,
            vec![Grant::on_object("EXECUTE", "dbo.uspGetData")]
        );
        assert_eq!(config.entry_count(), 1);
        assert_eq!(config.operation_count(), 3);
    }

    #[test]
    fn test_defaults_applied() {
        let config = PermissionsConfig::from_json_str(
            r#"{"servers": [{"name": "db01", "databases": [{"name": "App",
                "permissions": [{"login": "CORP\\svc_reports"}]}]}]}"#,
        )
        .unwrap();

        let server = &config.servers[0];
        assert_eq!(server.auth_type, AuthMode::Windows);
        assert!(!server.trust_server_certificate);

        let entry = &server.databases[0].permissions[0];
        assert_eq!(entry.login_type, LoginKind::Windows);
        assert_eq!(entry.effective_user(), "svc_reports");
        assert!(entry.roles.is_empty());
        assert!(entry.grants.is_empty());
    }

    #[test]
    fn test_missing_servers_is_fatal() {
        let error = PermissionsConfig::from_json_str(r#"{"databases": []}"#).unwrap_err();
        assert!(error.is_fatal());
        assert!(error.to_string().contains("servers"), "{}", error);
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        let error = PermissionsConfig::from_json_str("{ not json").unwrap_err();
        assert!(error.is_fatal());
        assert!(error.to_string().contains("Invalid JSON"));
    }

    #[test]
    fn test_auth_type_case_insensitive() {
        let config = PermissionsConfig::from_json_str(
            r#"{"servers": [{"name": "db01", "auth_type": "SQL",
                "username": "deployer", "password": "pw"}]}"#,
        )
        .unwrap();
        assert_eq!(config.servers[0].auth_type, AuthMode::Sql);
    }

    #[test]
    fn test_sql_auth_requires_credentials() {
        let error = PermissionsConfig::from_json_str(
            r#"{"servers": [{"name": "db01", "auth_type": "sql"}]}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("username"), "{}", error);
    }

    #[test]
    fn test_semantic_problems_reported_together() {
        let error = PermissionsConfig::from_json_str(
            r#"{"servers": [{"name": "db01", "databases": [{"name": "App];--",
                "permissions": [{"login": "CORP\\", "roles": ["db_owner'"],
                  "grants": [{"permission": "SELECT; DROP", "object": "dbo.x]"}]}]}]}]}"#,
        )
        .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("servers[0].databases[0].name"), "{}", message);
        assert!(message.contains("permissions[0].user"), "{}", message);
        assert!(message.contains("roles[0]"), "{}", message);
        assert!(message.contains("grants[0].permission"), "{}", message);
        assert!(message.contains("grants[0].object"), "{}", message);
    }

    #[test]
    fn test_server_debug_redacts_password() {
        let server = ServerSpec::new("db01").with_sql_auth("deployer", "s3cr3t-value");
        let debug = format!("{:?}", server);
        assert!(!debug.contains("s3cr3t-value"));
        assert!(debug.contains("deployer"));
    }

    #[test]
    fn test_password_never_serialized() {
        let server = ServerSpec::new("db01").with_sql_auth("deployer", "s3cr3t-value");
        let json = serde_json::to_string(&server).unwrap();
        assert!(!json.contains("s3cr3t-value"));
        assert!(json.contains("\"auth_type\":\"sql\""));
    }

    #[test]
    fn test_credentials_resolution() {
        let windows = ServerSpec::new("db01");
        assert!(windows.credentials().unwrap().is_none());

        let sql = ServerSpec::new("db01").with_sql_auth("deployer", "pw");
        let creds = sql.credentials().unwrap().unwrap();
        assert_eq!(creds.username(), "deployer");
        assert_eq!(creds.password(), Some("pw"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = PermissionsConfig::load(&path).unwrap();
        assert_eq!(config.servers[0].databases[0].name, "AppDatabase");

        let missing = PermissionsConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(missing.is_fatal());
    }

    #[test]
    fn test_misspelled_nested_key_is_fatal() {
        let text = r#"{
            "servers": [{
                "name": "db01",
                "databases": [{
                    "name": "App",
                    "permisions": [{ "login": "CORP\\svc", "roles": ["db_owner"] }]
                }]
            }]
        }"#;

        let error = PermissionsConfig::from_json_str(text).unwrap_err();
        assert!(error.is_fatal());
        assert!(error.to_string().contains("permisions"), "{}", error);
    }
}

//! In-memory server fake shared by the integration tests.
//!
//! `FakeServer` keeps a set of logins and database users and interprets the
//! handful of statement shapes the engine emits, so a second run against the
//! same server observes the first run's effects.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlperms_core::{
    AuditRecord, AuditSink, Connector, Result, ServerSpec, Session, SqlPermsError, Statement,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct ServerState {
    pub logins: HashSet<String>,
    /// (database, user)
    pub users: HashSet<(String, String)>,
    /// Every statement passed to `execute`, in order
    pub executed: Vec<String>,
    /// Every statement passed to `exists`, in order
    pub queried: Vec<String>,
    /// `execute` fails for statements containing any of these
    pub fail_execute_containing: Vec<String>,
    /// `exists` fails for every query
    pub fail_exists: bool,
    /// `execute` never completes
    pub hang_execute: bool,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
}

/// Handle to one fake server's state.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_login(self, login: &str) -> Self {
        self.state.lock().unwrap().logins.insert(login.to_string());
        self
    }

    pub fn with_user(self, database: &str, user: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .users
            .insert((database.to_string(), user.to_string()));
        self
    }

    pub fn failing_on(self, fragment: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_execute_containing
            .push(fragment.to_string());
        self
    }

    pub fn failing_exists(self) -> Self {
        self.state.lock().unwrap().fail_exists = true;
        self
    }

    pub fn hanging(self) -> Self {
        self.state.lock().unwrap().hang_execute = true;
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn queried(&self) -> Vec<String> {
        self.state.lock().unwrap().queried.clone()
    }

    pub fn has_login(&self, login: &str) -> bool {
        self.state.lock().unwrap().logins.contains(login)
    }

    pub fn has_user(&self, database: &str, user: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .users
            .contains(&(database.to_string(), user.to_string()))
    }

    pub fn sessions(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.sessions_opened, state.sessions_closed)
    }
}

/// Bracket-quoted names in statement order, with `]]` unescaped.
fn bracketed(sql: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = sql;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        let mut name = String::new();
        let mut chars = after.char_indices().peekable();
        let mut consumed = after.len();
        while let Some((i, c)) = chars.next() {
            if c == ']' {
                if matches!(chars.peek(), Some((_, ']'))) {
                    name.push(']');
                    chars.next();
                    continue;
                }
                consumed = i + 1;
                break;
            }
            name.push(c);
        }
        names.push(name);
        rest = &after[consumed..];
    }
    names
}

pub struct FakeSession {
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.executed.push(statement.sql().to_string());
            state.hang_execute
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let sql = statement.sql();
        if let Some(fragment) = state
            .fail_execute_containing
            .iter()
            .find(|f| sql.contains(f.as_str()))
        {
            return Err(SqlPermsError::statement(format!(
                "Cannot find the object '{}', because it does not exist or you do not have permission.",
                fragment
            )));
        }

        let names = bracketed(sql);
        if sql.starts_with("CREATE LOGIN") {
            state.logins.insert(names[0].clone());
        } else if sql.contains("CREATE USER") {
            state.users.insert((names[0].clone(), names[1].clone()));
        }
        Ok(())
    }

    async fn exists(&mut self, statement: &Statement) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.queried.push(statement.sql().to_string());
        if state.fail_exists {
            return Err(SqlPermsError::statement("VIEW SERVER STATE permission was denied"));
        }

        let value = statement.params()[0].clone();
        if statement.sql().contains("sys.server_principals") {
            Ok(state.logins.contains(&value))
        } else {
            let database = bracketed(statement.sql()).remove(0);
            Ok(state.users.contains(&(database, value)))
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

/// Routes connections by server name.
#[derive(Debug, Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    hanging: HashSet<String>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: &str, server: FakeServer) -> Self {
        self.servers.insert(name.to_string(), server);
        self
    }

    /// Connections to `name` never complete.
    pub fn with_hanging_server(mut self, name: &str) -> Self {
        self.hanging.insert(name.to_string());
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, server: &ServerSpec) -> Result<Box<dyn Session>> {
        if self.hanging.contains(&server.name) {
            std::future::pending::<()>().await;
        }
        let Some(fake) = self.servers.get(&server.name) else {
            return Err(SqlPermsError::connection(
                &server.name,
                "A network-related or instance-specific error occurred",
            ));
        };
        fake.state.lock().unwrap().sessions_opened += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&fake.state),
        }))
    }

    fn describe(&self) -> &'static str {
        "in-memory fake"
    }
}

/// Keeps flushed records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub flushed: Arc<Mutex<Vec<Vec<AuditRecord>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushed.lock().unwrap().len()
    }

    pub fn last(&self) -> Vec<AuditRecord> {
        self.flushed.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn persist(&self, records: &[AuditRecord]) -> Result<String> {
        self.flushed.lock().unwrap().push(records.to_vec());
        Ok("memory".to_string())
    }
}

/// Always fails to persist.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn persist(&self, _records: &[AuditRecord]) -> Result<String> {
        Err(SqlPermsError::audit_flush(
            "write audit file",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only file system"),
        ))
    }
}

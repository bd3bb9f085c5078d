//! Session capability consumed by the engine.
//!
//! A [`Connector`] opens one [`Session`] per server. The engine only ever
//! needs two things from a session: run a statement, and ask whether a query
//! returns any row. Sessions run in autocommit mode, so a successful
//! `execute` is already committed.

use crate::Result;
use crate::config::ServerSpec;
use crate::statement::Statement;
use async_trait::async_trait;

/// An open connection to one server.
#[async_trait]
pub trait Session: Send {
    /// Executes a statement that returns no rows. Committed on success.
    ///
    /// # Errors
    /// Returns [`crate::SqlPermsError::Statement`] with the server's message.
    async fn execute(&mut self, statement: &Statement) -> Result<()>;

    /// Runs a query and reports whether it produced at least one row.
    ///
    /// # Errors
    /// Returns [`crate::SqlPermsError::Statement`] with the server's message.
    async fn exists(&mut self, statement: &Statement) -> Result<bool>;

    /// Closes the session. The session cannot be used afterwards.
    ///
    /// # Errors
    /// Returns an error if the server did not acknowledge the close.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens sessions to configured servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a session to `server`.
    ///
    /// # Errors
    /// Returns [`crate::SqlPermsError::Connection`] when the server cannot be
    /// reached or rejects the credentials.
    async fn connect(&self, server: &ServerSpec) -> Result<Box<dyn Session>>;

    /// Short description for logs (never contains credentials).
    fn describe(&self) -> &'static str;
}

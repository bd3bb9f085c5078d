//! SQL Server sessions over TDS (tiberius).
//!
//! Server names follow SQL Server client conventions: `host`, `host,port`,
//! or `host\instance` (resolved through the SQL Browser service). An explicit
//! `port` in the configuration wins over any port in the name.

use crate::config::{AuthMode, ServerSpec};
use crate::error::SqlPermsError;
use crate::session::{Connector, Session};
use crate::statement::Statement;
use crate::Result;
use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, SqlBrowser, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// Default SQL Server TCP port.
pub const DEFAULT_PORT: u16 = 1433;

const APPLICATION_NAME: &str = "sqlperms";

/// Parsed form of a server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
    pub instance: Option<String>,
}

impl ServerAddress {
    /// Parses `host`, `host,port`, `host:port`, or `host\instance`.
    ///
    /// # Errors
    /// Returns a configuration error for an empty host or a bad port.
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();

        if let Some((host, instance)) = name.split_once('\\') {
            if host.is_empty() || instance.is_empty() {
                return Err(SqlPermsError::configuration(format!(
                    "invalid server name '{}'",
                    name
                )));
            }
            return Ok(Self {
                host: host.to_string(),
                port: None,
                instance: Some(instance.to_string()),
            });
        }

        let (host, port) = match name.split_once(',').or_else(|| name.split_once(':')) {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    SqlPermsError::configuration(format!("invalid port in server name '{}'", name))
                })?;
                (host.trim(), Some(port))
            }
            None => (name, None),
        };

        if host.is_empty() {
            return Err(SqlPermsError::configuration(format!(
                "invalid server name '{}'",
                name
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            instance: None,
        })
    }
}

/// Builds the tiberius configuration for a server.
///
/// # Errors
/// Returns a configuration error for unparsable names, missing SQL
/// credentials, or Windows authentication on a platform without it.
pub fn build_config(server: &ServerSpec) -> Result<Config> {
    let address = ServerAddress::parse(&server.name)?;

    let mut config = Config::new();
    config.host(&address.host);
    if let Some(instance) = &address.instance {
        config.instance_name(instance);
    }
    if let Some(port) = server.port.or(address.port) {
        config.port(port);
    } else if address.instance.is_none() {
        config.port(DEFAULT_PORT);
    }
    config.application_name(APPLICATION_NAME);
    if server.trust_server_certificate {
        config.trust_cert();
    }

    match server.auth_type {
        AuthMode::Sql => {
            let credentials = server.credentials()?.ok_or_else(|| {
                SqlPermsError::configuration("sql authentication requires credentials")
            })?;
            config.authentication(AuthMethod::sql_server(
                credentials.username(),
                credentials.password().unwrap_or_default(),
            ));
        }
        AuthMode::Windows => integrated_auth(&mut config)?,
    }

    Ok(config)
}

#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
fn integrated_auth(config: &mut Config) -> Result<()> {
    config.authentication(AuthMethod::Integrated);
    Ok(())
}

#[cfg(not(windows))]
fn integrated_auth(_config: &mut Config) -> Result<()> {
    Err(SqlPermsError::configuration(
        "windows authentication is only available on Windows hosts; use auth_type \"sql\"",
    ))
}

/// Connects to SQL Server over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlConnector;

impl MssqlConnector {
    /// Creates a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self, server: &ServerSpec) -> Result<Box<dyn Session>> {
        let address = ServerAddress::parse(&server.name)
            .map_err(|e| SqlPermsError::connection(&server.name, e.to_string()))?;
        let config = build_config(server).map_err(|e| match e {
            SqlPermsError::Configuration { message } => SqlPermsError::connection(&server.name, message),
            other => other,
        })?;

        let tcp = if address.instance.is_some() && server.port.is_none() {
            TcpStream::connect_named(&config)
                .await
                .map_err(|e| SqlPermsError::connection_failed(&server.name, "SQL Browser lookup failed", e))?
        } else {
            TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| SqlPermsError::connection_failed(&server.name, "TCP connect failed", e))?
        };

        tcp.set_nodelay(true)
            .map_err(|e| SqlPermsError::connection_failed(&server.name, "TCP setup failed", e))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| SqlPermsError::connection_failed(&server.name, "login handshake failed", e))?;

        Ok(Box::new(MssqlSession { client }))
    }

    fn describe(&self) -> &'static str {
        "SQL Server (TDS)"
    }
}

/// One open TDS connection.
pub struct MssqlSession {
    client: Client<Compat<TcpStream>>,
}

fn bind_params(statement: &Statement) -> Vec<&dyn ToSql> {
    statement.params().iter().map(|p| p as &dyn ToSql).collect()
}

#[async_trait]
impl Session for MssqlSession {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        if statement.params().is_empty() {
            self.client
                .simple_query(statement.sql())
                .await
                .map_err(|e| SqlPermsError::statement(e.to_string()))?
                .into_results()
                .await
                .map_err(|e| SqlPermsError::statement(e.to_string()))?;
        } else {
            let params = bind_params(statement);
            self.client
                .execute(statement.sql(), &params)
                .await
                .map_err(|e| SqlPermsError::statement(e.to_string()))?;
        }
        Ok(())
    }

    async fn exists(&mut self, statement: &Statement) -> Result<bool> {
        let params = bind_params(statement);
        let row = self
            .client
            .query(statement.sql(), &params)
            .await
            .map_err(|e| SqlPermsError::statement(e.to_string()))?
            .into_row()
            .await
            .map_err(|e| SqlPermsError::statement(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { client } = *self;
        client
            .close()
            .await
            .map_err(|e| SqlPermsError::statement(format!("close failed: {}", e)))
    }
}

//! Database connection port used by table-level actions.
//!
//! Sessions are opened per action invocation and wrapped in a
//! [`SessionGuard`] so they are expired on every exit path, including early
//! returns through `?`.

use crate::schema_change::domain::TableDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Change-log replication endpoint of a datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEndpoint {
    /// Cluster configuration URL.
    pub config_url: String,
    /// Replication user.
    pub username: String,
    /// Replication password.
    pub password: String,
    /// Application name registered for the replication client.
    pub app_name: String,
}

/// Connection settings of a datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login user without tenant or cluster qualifiers.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Tenant the user belongs to, for multi-tenant engines.
    pub tenant: Option<String>,
    /// Cluster the tenant lives in.
    pub cluster: Option<String>,
    /// Region used to place worker resources.
    pub region: Option<String>,
    /// Change-log endpoint, when the datasource exposes one.
    pub replication: Option<ReplicationEndpoint>,
}

impl ConnectionConfig {
    /// Returns the fully qualified login, `user@tenant#cluster`.
    #[must_use]
    pub fn qualified_username(&self) -> String {
        let mut login = self.username.clone();
        if let Some(tenant) = &self.tenant {
            login.push('@');
            login.push_str(tenant);
        }
        if let Some(cluster) = &self.cluster {
            login.push('#');
            login.push_str(cluster);
        }
        login
    }
}

/// A renaming of one table, applied as part of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRename {
    /// Current table name.
    pub from: String,
    /// New table name.
    pub to: String,
}

impl TableRename {
    /// Creates a rename from `from` to `to`.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// One database session scoped to a schema.
#[async_trait]
pub trait DbSession: Send + Sync {
    /// Returns the server-side identifier of this session.
    fn session_id(&self) -> u64;

    /// Executes a statement without results.
    async fn execute(&self, sql: &str) -> DbResult<()>;

    /// Drops `table` if it exists.
    async fn drop_table_if_exists(&self, table: &str) -> DbResult<()>;

    /// Returns whether `table` exists.
    async fn table_exists(&self, table: &str) -> DbResult<bool>;

    /// Reads the column layout and DDL of `table`.
    async fn describe_table(&self, table: &str) -> DbResult<Option<TableDefinition>>;

    /// Takes a write lock on `table` for this session.
    async fn lock_table(&self, table: &str) -> DbResult<()>;

    /// Releases every table lock held by this session.
    async fn unlock_tables(&self) -> DbResult<()>;

    /// Applies every rename in one atomic statement.
    async fn rename_tables(&self, renames: &[TableRename]) -> DbResult<()>;

    /// Returns the engine version string.
    async fn server_version(&self) -> DbResult<String>;

    /// Lists sessions holding or waiting on locks for `table`.
    async fn list_blocking_sessions(&self, table: &str) -> DbResult<Vec<u64>>;

    /// Terminates another session.
    async fn kill_session(&self, session_id: u64) -> DbResult<()>;

    /// Releases the session. Must be safe to call more than once.
    fn expire(&self);
}

/// Opens sessions against a datasource.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Returns the connection settings of `datasource`.
    async fn connection_config(&self, datasource: &str) -> DbResult<ConnectionConfig>;

    /// Opens a session against `schema` of `datasource`.
    async fn create_session(&self, datasource: &str, schema: &str) -> DbResult<SessionGuard>;
}

/// Owns a session and expires it when dropped.
pub struct SessionGuard {
    session: Box<dyn DbSession>,
}

impl SessionGuard {
    /// Wraps an open session.
    #[must_use]
    pub fn new(session: Box<dyn DbSession>) -> Self {
        Self { session }
    }
}

impl Deref for SessionGuard {
    type Target = dyn DbSession;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.expire();
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session_id", &self.session.session_id())
            .finish()
    }
}

/// Errors returned by database sessions and providers.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// A statement failed.
    #[error("statement failed: {statement}: {message}")]
    Statement {
        /// Offending statement.
        statement: String,
        /// Engine message.
        message: String,
    },

    /// A table expected to exist is missing.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The datasource is unknown.
    #[error("datasource not found: {0}")]
    DatasourceNotFound(String),

    /// Driver or network failure.
    #[error("connection error: {0}")]
    Connection(Arc<dyn std::error::Error + Send + Sync>),
}

impl DbError {
    /// Wraps a driver or network error.
    pub fn connection(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection(Arc::new(err))
    }

    /// Builds a statement failure.
    pub fn statement(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

//! In-memory database for exercising table-level actions.
//!
//! Tables are tracked by name per schema. DDL statements are matched
//! verbatim against definitions registered with
//! [`InMemoryDatabase::register_ddl`]; any other statement is recorded and
//! succeeds unless it matches a configured failure.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::schema_change::{
    domain::TableDefinition,
    ports::{
        ConnectionConfig, ConnectionProvider, DbError, DbResult, DbSession, SessionGuard,
        TableRename,
    },
};

type TableKey = (String, String);

/// Shared in-memory database backing every session it opens.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    datasources: HashMap<String, ConnectionConfig>,
    tables: HashMap<TableKey, TableDefinition>,
    ddl_definitions: HashMap<String, TableDefinition>,
    failing_fragments: Vec<String>,
    executed: Vec<String>,
    server_version: String,
    locks: HashMap<TableKey, u64>,
    blocking_sessions: Vec<u64>,
    killed_sessions: Vec<u64>,
    fail_renames: bool,
    rename_batches: usize,
    next_session_id: u64,
    open_sessions: HashSet<u64>,
    expired_sessions: usize,
}

fn table_key(schema: &str, table: &str) -> TableKey {
    (schema.to_owned(), table.to_owned())
}

impl InMemoryDatabase {
    /// Creates an empty database reporting engine version `4.2.5`.
    #[must_use]
    pub fn new() -> Self {
        let database = Self::default();
        database.with_state(|state| state.server_version = "4.2.5".to_owned());
        database
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DatabaseState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    fn lock_state(&self) -> DbResult<MutexGuard<'_, DatabaseState>> {
        self.state
            .lock()
            .map_err(|err| DbError::connection(std::io::Error::other(err.to_string())))
    }

    /// Registers connection settings for `datasource`.
    pub fn register_datasource(&self, datasource: impl Into<String>, config: ConnectionConfig) {
        self.with_state(|state| {
            state.datasources.insert(datasource.into(), config);
        });
    }

    /// Creates a table directly, bypassing DDL.
    pub fn create_table(&self, schema: &str, definition: TableDefinition) {
        self.with_state(|state| {
            state
                .tables
                .insert(table_key(schema, &definition.name), definition);
        });
    }

    /// Removes a table directly, bypassing sessions and locks.
    pub fn remove_table(&self, schema: &str, table: &str) {
        self.with_state(|state| {
            state.tables.remove(&table_key(schema, table));
        });
    }

    /// Declares the table a DDL statement creates.
    pub fn register_ddl(&self, ddl: impl Into<String>, definition: TableDefinition) {
        self.with_state(|state| {
            state.ddl_definitions.insert(ddl.into().trim().to_owned(), definition);
        });
    }

    /// Makes every statement containing `fragment` fail.
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        self.with_state(|state| state.failing_fragments.push(fragment.into()));
    }

    /// Sets the engine version reported to sessions.
    pub fn set_server_version(&self, version: impl Into<String>) {
        self.with_state(|state| state.server_version = version.into());
    }

    /// Adds a foreign session reported as blocking every table.
    pub fn add_blocking_session(&self, session_id: u64) {
        self.with_state(|state| state.blocking_sessions.push(session_id));
    }

    /// Makes every rename batch fail.
    pub fn fail_renames(&self, fail: bool) {
        self.with_state(|state| state.fail_renames = fail);
    }

    /// Returns the definition of `table`, if it exists.
    #[must_use]
    pub fn table(&self, schema: &str, table: &str) -> Option<TableDefinition> {
        self.with_state(|state| state.tables.get(&table_key(schema, table)).cloned())
    }

    /// Returns the sorted table names of `schema`.
    #[must_use]
    pub fn table_names(&self, schema: &str) -> Vec<String> {
        self.with_state(|state| {
            let mut names: Vec<String> = state
                .tables
                .keys()
                .filter(|(table_schema, _)| table_schema == schema)
                .map(|(_, name)| name.clone())
                .collect();
            names.sort();
            names
        })
    }

    /// Returns every statement executed so far, in order.
    #[must_use]
    pub fn executed_statements(&self) -> Vec<String> {
        self.with_state(|state| state.executed.clone())
    }

    /// Returns the sessions killed so far.
    #[must_use]
    pub fn killed_sessions(&self) -> Vec<u64> {
        self.with_state(|state| state.killed_sessions.clone())
    }

    /// Returns the number of successful rename batches.
    #[must_use]
    pub fn rename_batches(&self) -> usize {
        self.with_state(|state| state.rename_batches)
    }

    /// Returns the number of sessions opened and not yet expired.
    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.with_state(|state| state.open_sessions.len())
    }

    /// Returns the number of sessions expired so far.
    #[must_use]
    pub fn expired_session_count(&self) -> usize {
        self.with_state(|state| state.expired_sessions)
    }

    /// Returns whether any session holds a lock on `table`.
    #[must_use]
    pub fn is_locked(&self, schema: &str, table: &str) -> bool {
        self.with_state(|state| state.locks.contains_key(&table_key(schema, table)))
    }
}

#[async_trait]
impl ConnectionProvider for InMemoryDatabase {
    async fn connection_config(&self, datasource: &str) -> DbResult<ConnectionConfig> {
        let state = self.lock_state()?;
        state
            .datasources
            .get(datasource)
            .cloned()
            .ok_or_else(|| DbError::DatasourceNotFound(datasource.to_owned()))
    }

    async fn create_session(&self, datasource: &str, schema: &str) -> DbResult<SessionGuard> {
        let mut state = self.lock_state()?;
        if !state.datasources.contains_key(datasource) {
            return Err(DbError::DatasourceNotFound(datasource.to_owned()));
        }
        state.next_session_id += 1;
        let id = state.next_session_id;
        state.open_sessions.insert(id);
        Ok(SessionGuard::new(Box::new(InMemorySession {
            id,
            schema: schema.to_owned(),
            database: self.clone(),
            expired: AtomicBool::new(false),
        })))
    }
}

struct InMemorySession {
    id: u64,
    schema: String,
    database: InMemoryDatabase,
    expired: AtomicBool,
}

impl InMemorySession {
    fn key(&self, table: &str) -> TableKey {
        table_key(&self.schema, table)
    }
}

fn check_locks(state: &DatabaseState, key: &TableKey, session: u64) -> DbResult<()> {
    match state.locks.get(key) {
        Some(holder) if *holder != session => Err(DbError::statement(
            format!("access {}", key.1),
            format!("table is locked by session {holder}"),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl DbSession for InMemorySession {
    fn session_id(&self) -> u64 {
        self.id
    }

    async fn execute(&self, sql: &str) -> DbResult<()> {
        let mut state = self.database.lock_state()?;
        state.executed.push(sql.to_owned());
        if state
            .failing_fragments
            .iter()
            .any(|fragment| sql.contains(fragment.as_str()))
        {
            return Err(DbError::statement(sql, "injected failure"));
        }
        let Some(definition) = state.ddl_definitions.get(sql.trim()).cloned() else {
            return Ok(());
        };
        let key = self.key(&definition.name);
        if state.tables.contains_key(&key) {
            return Err(DbError::statement(sql, "table already exists"));
        }
        state.tables.insert(key, definition);
        Ok(())
    }

    async fn drop_table_if_exists(&self, table: &str) -> DbResult<()> {
        let statement = format!("DROP TABLE IF EXISTS {table}");
        let mut state = self.database.lock_state()?;
        state.executed.push(statement.clone());
        if state
            .failing_fragments
            .iter()
            .any(|fragment| statement.contains(fragment.as_str()))
        {
            return Err(DbError::statement(statement, "injected failure"));
        }
        let key = self.key(table);
        check_locks(&state, &key, self.id)?;
        state.tables.remove(&key);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        let state = self.database.lock_state()?;
        Ok(state.tables.contains_key(&self.key(table)))
    }

    async fn describe_table(&self, table: &str) -> DbResult<Option<TableDefinition>> {
        let state = self.database.lock_state()?;
        Ok(state.tables.get(&self.key(table)).cloned())
    }

    async fn lock_table(&self, table: &str) -> DbResult<()> {
        let mut state = self.database.lock_state()?;
        let key = self.key(table);
        if !state.tables.contains_key(&key) {
            return Err(DbError::TableNotFound(table.to_owned()));
        }
        check_locks(&state, &key, self.id)?;
        state.locks.insert(key, self.id);
        state.executed.push(format!("LOCK TABLE {table}"));
        Ok(())
    }

    async fn unlock_tables(&self) -> DbResult<()> {
        let mut state = self.database.lock_state()?;
        state.locks.retain(|_, holder| *holder != self.id);
        state.executed.push("UNLOCK TABLES".to_owned());
        Ok(())
    }

    async fn rename_tables(&self, renames: &[TableRename]) -> DbResult<()> {
        let pairs = renames
            .iter()
            .map(|rename| format!("{} TO {}", rename.from, rename.to))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!("RENAME TABLE {pairs}");
        let mut state = self.database.lock_state()?;
        state.executed.push(statement.clone());
        if state.fail_renames {
            return Err(DbError::statement(statement, "injected rename failure"));
        }

        let mut staged = state.tables.clone();
        for rename in renames {
            let from = self.key(&rename.from);
            let to = self.key(&rename.to);
            check_locks(&state, &from, self.id)?;
            let Some(mut definition) = staged.remove(&from) else {
                return Err(DbError::statement(
                    statement,
                    format!("table {} does not exist", rename.from),
                ));
            };
            if staged.contains_key(&to) {
                return Err(DbError::statement(
                    statement,
                    format!("table {} already exists", rename.to),
                ));
            }
            definition.name.clone_from(&rename.to);
            staged.insert(to, definition);
        }

        let locked: Vec<TableKey> = state
            .locks
            .iter()
            .filter(|(_, holder)| **holder == self.id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in locked {
            state.locks.remove(&key);
            if let Some(rename) = renames.iter().find(|rename| self.key(&rename.from) == key) {
                state.locks.insert(self.key(&rename.to), self.id);
            } else {
                state.locks.insert(key, self.id);
            }
        }
        state.tables = staged;
        state.rename_batches += 1;
        Ok(())
    }

    async fn server_version(&self) -> DbResult<String> {
        let state = self.database.lock_state()?;
        Ok(state.server_version.clone())
    }

    async fn list_blocking_sessions(&self, _table: &str) -> DbResult<Vec<u64>> {
        let state = self.database.lock_state()?;
        Ok(state
            .blocking_sessions
            .iter()
            .copied()
            .filter(|session| *session != self.id)
            .collect())
    }

    async fn kill_session(&self, session_id: u64) -> DbResult<()> {
        let mut state = self.database.lock_state()?;
        state.blocking_sessions.retain(|session| *session != session_id);
        state.killed_sessions.push(session_id);
        Ok(())
    }

    fn expire(&self) {
        if self.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.database.with_state(|state| {
            state.open_sessions.remove(&self.id);
            state.locks.retain(|_, holder| *holder != self.id);
            state.expired_sessions += 1;
        });
    }
}

//! Table shapes, ghost/archive naming, and the checks a table must pass
//! before and while it is changed.

use super::OscDomainError;
use serde::{Deserialize, Serialize};

const GHOST_SUFFIX: &str = "_osc_new_";
const ARCHIVE_SUFFIX: &str = "_osc_old_";

/// Longest origin table name whose ghost and archive names still fit the
/// engine's identifier limit.
pub const MAX_TABLE_NAME_LENGTH: usize = 54;

/// A unique key of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    /// Key column names in key order.
    pub columns: Vec<String>,
    /// Whether any key column accepts `NULL`.
    pub nullable: bool,
}

impl UniqueKey {
    /// Creates a unique key over `columns`.
    #[must_use]
    pub fn new(columns: impl IntoIterator<Item = String>, nullable: bool) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            nullable,
        }
    }
}

/// Column layout of a table as reported by the database engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Column names in declaration order.
    pub columns: Vec<String>,
    /// Primary key column names in key order.
    pub primary_key: Vec<String>,
    /// DDL the engine reports for the table.
    pub ddl: String,
    /// Names of the foreign key constraints declared on the table.
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    /// Unique keys other than the primary key.
    #[serde(default)]
    pub unique_keys: Vec<UniqueKey>,
}

impl TableDefinition {
    /// Creates a table definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = String>,
        primary_key: impl IntoIterator<Item = String>,
        ddl: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().collect(),
            primary_key: primary_key.into_iter().collect(),
            ddl: ddl.into(),
            foreign_keys: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    /// Adds a foreign key constraint.
    #[must_use]
    pub fn with_foreign_key(mut self, name: impl Into<String>) -> Self {
        self.foreign_keys.push(name.into());
        self
    }

    /// Adds a unique key.
    #[must_use]
    pub fn with_unique_key(mut self, key: UniqueKey) -> Self {
        self.unique_keys.push(key);
        self
    }

    /// Returns whether the table declares `column` (case-insensitive).
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(column))
    }
}

/// Checks that `new_table` can receive every row of `origin`.
///
/// Every origin column must exist in the new table, and every primary key
/// column of the new table must exist in the origin table. Returns the
/// origin columns to replicate, in origin order.
///
/// # Errors
///
/// Returns [`OscDomainError::ColumnNotFound`] for the first origin column
/// missing from the new table, or
/// [`OscDomainError::PrimaryKeyColumnNotInOrigin`] for a primary key column
/// the origin table lacks.
pub fn check_column_compatibility(
    origin: &TableDefinition,
    new_table: &TableDefinition,
) -> Result<Vec<String>, OscDomainError> {
    if let Some(missing) = origin
        .columns
        .iter()
        .find(|column| !new_table.has_column(column))
    {
        return Err(OscDomainError::ColumnNotFound {
            column: missing.clone(),
            table: new_table.name.clone(),
        });
    }

    if let Some(added) = new_table
        .primary_key
        .iter()
        .find(|column| !origin.has_column(column))
    {
        return Err(OscDomainError::PrimaryKeyColumnNotInOrigin {
            column: added.clone(),
        });
    }

    Ok(origin.columns.clone())
}

/// Checks that `table` is short enough to derive ghost and archive names.
///
/// # Errors
///
/// Returns [`OscDomainError::TableNameTooLong`] above
/// [`MAX_TABLE_NAME_LENGTH`] characters.
pub fn check_table_name_length(table: &str) -> Result<(), OscDomainError> {
    let length = table.trim().chars().count();
    if length > MAX_TABLE_NAME_LENGTH {
        return Err(OscDomainError::TableNameTooLong {
            table: table.trim().to_owned(),
            length,
            max: MAX_TABLE_NAME_LENGTH,
        });
    }
    Ok(())
}

/// Checks that rows of `origin` can be replicated and swapped safely.
///
/// The table must not take part in foreign keys of its own, and every row
/// must be addressable through a primary key or a unique key without
/// nullable columns.
///
/// # Errors
///
/// Returns [`OscDomainError::ForeignKeyTable`] or
/// [`OscDomainError::NoUniqueKey`].
pub fn check_table_eligible(origin: &TableDefinition) -> Result<(), OscDomainError> {
    if !origin.foreign_keys.is_empty() {
        return Err(OscDomainError::ForeignKeyTable(origin.name.clone()));
    }
    let addressable = !origin.primary_key.is_empty()
        || origin
            .unique_keys
            .iter()
            .any(|key| !key.columns.is_empty() && !key.nullable);
    if !addressable {
        return Err(OscDomainError::NoUniqueKey(origin.name.clone()));
    }
    Ok(())
}

/// Derives the ghost table name for `origin`, preserving identifier quotes.
#[must_use]
pub fn ghost_table_name(origin: &str) -> String {
    decorate(origin, GHOST_SUFFIX)
}

/// Derives the archive table name for `origin`, preserving identifier quotes.
#[must_use]
pub fn archive_table_name(origin: &str) -> String {
    decorate(origin, ARCHIVE_SUFFIX)
}

fn decorate(origin: &str, suffix: &str) -> String {
    let trimmed = origin.trim();
    for quote in ['`', '"'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return format!("{quote}_{inner}{suffix}{quote}");
        }
    }
    format!("_{trimmed}{suffix}")
}

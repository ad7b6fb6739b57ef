//! Versioned encoding of persisted task parameters.
//!
//! Parameters are stored as JSON carrying a `version` field. Blobs written
//! before versioning existed have no such field, use camelCase keys, and are
//! treated as version 1.

use super::{TASK_PARAMETERS_VERSION, TaskParameters};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while decoding or upgrading persisted task parameters.
#[derive(Debug, Error)]
pub enum ParameterUpgradeError {
    /// The blob declares a version this build cannot read.
    #[error("unsupported task parameters version: {0}")]
    UnsupportedVersion(u64),

    /// The blob is not a JSON object or has an unusable shape.
    #[error("malformed task parameters: {0}")]
    Malformed(String),

    /// JSON encoding or decoding failed.
    #[error("task parameters codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for parameter upgrade operations.
pub type UpgradeResult<T> = Result<T, ParameterUpgradeError>;

/// Legacy camelCase keys and their current names.
const V1_KEY_RENAMES: &[(&str, &str)] = &[
    ("databaseName", "database_name"),
    ("originTableName", "origin_table_name"),
    ("newTableName", "new_table_name"),
    ("renamedTableName", "renamed_table_name"),
    ("originTableCreateDdl", "origin_table_ddl"),
    ("newTableCreateDdl", "new_table_ddl"),
    ("newTableCreateDdlForDisplay", "ghost_table_ddl"),
    ("sqlsToBeExecuted", "auxiliary_sqls"),
    ("filterColumns", "filter_columns"),
    ("rateLimitConfig", "rate_limit"),
    ("resourceID", "resource_id"),
    ("k8sMapperPort", "mapped_port"),
    ("odcCommandURl", "control_url"),
    ("omsDataSourceId", "migration_datasource_id"),
    ("omsProjectId", "migration_project_id"),
];

/// Upgrades raw task parameter blobs to the current layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskParametersUpgrader;

impl TaskParametersUpgrader {
    /// The layout version produced by [`TaskParametersUpgrader::upgrade`].
    pub const CURRENT_VERSION: u32 = TASK_PARAMETERS_VERSION;

    /// Layout versions this upgrader reads.
    const SUPPORTED_VERSIONS: &'static [u64] = &[1, 2];

    /// Creates a new upgrader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns `true` if blobs at `version` can be upgraded.
    #[must_use]
    pub fn supports_version(&self, version: u64) -> bool {
        Self::SUPPORTED_VERSIONS.contains(&version)
    }

    /// Upgrades `blob` to [`TaskParametersUpgrader::CURRENT_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns [`ParameterUpgradeError::Malformed`] when the blob is not an
    /// object and [`ParameterUpgradeError::UnsupportedVersion`] when its
    /// version is unknown.
    pub fn upgrade(&self, blob: Value) -> UpgradeResult<Value> {
        let Value::Object(object) = blob else {
            return Err(ParameterUpgradeError::Malformed(
                "expected task parameters to be an object".to_owned(),
            ));
        };
        let version = object.get("version").and_then(Value::as_u64).unwrap_or(1);
        if !self.supports_version(version) {
            return Err(ParameterUpgradeError::UnsupportedVersion(version));
        }
        let upgraded = if version == 1 {
            Self::upgrade_v1_to_v2(object)
        } else {
            object
        };
        Ok(Value::Object(upgraded))
    }

    fn upgrade_v1_to_v2(legacy: Map<String, Value>) -> Map<String, Value> {
        let mut upgraded = Map::new();
        for (key, value) in legacy {
            let renamed = V1_KEY_RENAMES
                .iter()
                .find(|(old, _)| *old == key)
                .map_or(key.as_str(), |(_, new)| *new)
                .to_owned();
            let converted = match renamed.as_str() {
                "rate_limit" => upgrade_v1_rate_limit(value),
                "resource_id" | "mapped_port" => drop_unset_number(value),
                _ => value,
            };
            if converted.is_null() {
                continue;
            }
            upgraded.insert(renamed, converted);
        }
        upgraded.insert("version".to_owned(), Value::from(TASK_PARAMETERS_VERSION));
        upgraded
    }
}

fn upgrade_v1_rate_limit(value: Value) -> Value {
    let Value::Object(legacy) = value else {
        return Value::Null;
    };
    let mut upgraded = Map::new();
    if let Some(rows) = legacy.get("rowLimit").cloned() {
        upgraded.insert("row_limit".to_owned(), drop_unset_number(rows));
    }
    if let Some(bytes) = legacy.get("dataSizeLimit").cloned() {
        upgraded.insert("data_size_limit".to_owned(), drop_unset_number(bytes));
    }
    Value::Object(upgraded)
}

/// Legacy blobs encode "unset" numeric handles as zero or negative values.
fn drop_unset_number(value: Value) -> Value {
    match value.as_i64() {
        Some(number) if number <= 0 => Value::Null,
        _ => value,
    }
}

/// Decodes persisted task parameters, upgrading older layouts.
///
/// # Errors
///
/// Returns [`ParameterUpgradeError`] when the text is not valid JSON, the
/// layout cannot be upgraded, or required fields are missing.
pub fn decode_task_parameters(json: &str) -> UpgradeResult<TaskParameters> {
    let raw: Value = serde_json::from_str(json)?;
    let upgraded = TaskParametersUpgrader::new().upgrade(raw)?;
    let parameters = serde_json::from_value(upgraded)?;
    Ok(parameters)
}

/// Encodes task parameters in the current layout.
///
/// # Errors
///
/// Returns [`ParameterUpgradeError::Codec`] when serialization fails.
pub fn encode_task_parameters(parameters: &TaskParameters) -> UpgradeResult<String> {
    let mut current = parameters.clone();
    current.version = TASK_PARAMETERS_VERSION;
    Ok(serde_json::to_string(&current)?)
}

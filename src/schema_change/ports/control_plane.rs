//! Control-plane port of the self-hosted migration worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for control-plane calls.
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Envelope returned by every control-plane endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorResponse {
    /// Whether the worker accepted the call.
    pub success: bool,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub response_data: Option<serde_json::Value>,
}

impl SupervisorResponse {
    /// Creates a successful response without payload.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            response_data: None,
        }
    }

    /// Creates a failed response without payload.
    #[must_use]
    pub const fn rejected() -> Self {
        Self {
            success: false,
            response_data: None,
        }
    }
}

/// Raw counters published by the worker `monitor` endpoint.
///
/// Every counter travels as a string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMigrationCounters {
    #[serde(default)]
    checkpoint: Option<String>,
    #[serde(default)]
    estimate_migrate_rows: Option<String>,
    #[serde(default)]
    full_migrator_progress: Option<String>,
    #[serde(default)]
    full_migrator_done: Option<String>,
    #[serde(default)]
    table_total_rows: Option<String>,
}

/// Replication counters reported by a worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationCounters {
    /// Seconds since the epoch up to which changes were applied.
    pub checkpoint: Option<i64>,
    /// Rows copied so far.
    pub estimate_migrate_rows: Option<u64>,
    /// Bulk copy progress in percent.
    pub full_migrator_progress: f64,
    /// Whether the bulk copy finished.
    pub full_migrator_done: bool,
    /// Rows in the origin table.
    pub table_total_rows: Option<u64>,
}

impl MigrationCounters {
    /// Parses the JSON text carried in `responseData.data`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Decode`] when the text is not a JSON
    /// object of string counters or a counter is not numeric.
    pub fn from_monitor_data(data: &str) -> ControlPlaneResult<Self> {
        let raw: RawMigrationCounters = serde_json::from_str(data)
            .map_err(|err| ControlPlaneError::Decode(err.to_string()))?;
        Ok(Self {
            checkpoint: parse_counter(raw.checkpoint.as_deref(), "checkpoint")?,
            estimate_migrate_rows: parse_counter(
                raw.estimate_migrate_rows.as_deref(),
                "estimateMigrateRows",
            )?,
            full_migrator_progress: parse_counter(
                raw.full_migrator_progress.as_deref(),
                "fullMigratorProgress",
            )?
            .unwrap_or_default(),
            full_migrator_done: parse_counter(
                raw.full_migrator_done.as_deref(),
                "fullMigratorDone",
            )?
            .unwrap_or_default(),
            table_total_rows: parse_counter(raw.table_total_rows.as_deref(), "tableTotalRows")?,
        })
    }

    /// Extracts counters from a `monitor` response envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Rejected`] when the worker reports
    /// `success = false`, or [`ControlPlaneError::Decode`] when the envelope
    /// carries no `data` string or the counters cannot be parsed.
    pub fn from_response(response: &SupervisorResponse) -> ControlPlaneResult<Self> {
        if !response.success {
            return Err(ControlPlaneError::Rejected {
                path: "/monitor".to_owned(),
            });
        }
        let data = response
            .response_data
            .as_ref()
            .and_then(|payload| payload.get("data"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ControlPlaneError::Decode("monitor response has no data".to_owned()))?;
        Self::from_monitor_data(data)
    }

    /// Returns whether the counters come from a replication run.
    ///
    /// A worker that was never started publishes no checkpoint, no row
    /// estimate and no bulk copy progress.
    #[must_use]
    pub fn shows_replication(&self) -> bool {
        self.checkpoint.is_some()
            || self.estimate_migrate_rows.is_some()
            || self.full_migrator_done
            || self.full_migrator_progress > 0.0
    }
}

fn parse_counter<T: std::str::FromStr>(
    value: Option<&str>,
    name: &str,
) -> ControlPlaneResult<Option<T>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| ControlPlaneError::Decode(format!("counter {name} is not valid: {text}"))),
    }
}

/// HTTP control plane of one worker, addressed by base URL.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Checks that the worker answers.
    async fn heartbeat(&self, base_url: &str) -> ControlPlaneResult<SupervisorResponse>;

    /// Starts replication with a flat configuration map.
    async fn start(
        &self,
        base_url: &str,
        config: &BTreeMap<String, String>,
    ) -> ControlPlaneResult<SupervisorResponse>;

    /// Reads replication counters.
    async fn monitor(&self, base_url: &str) -> ControlPlaneResult<MigrationCounters>;

    /// Changes the replication throughput limit.
    async fn update(
        &self,
        base_url: &str,
        throttle_rps: u32,
    ) -> ControlPlaneResult<SupervisorResponse>;

    /// Stops replication and clears worker state.
    async fn clear(&self, base_url: &str) -> ControlPlaneResult<SupervisorResponse>;

    /// Returns whether the worker answers its heartbeat successfully.
    async fn is_alive(&self, base_url: &str) -> bool {
        matches!(self.heartbeat(base_url).await, Ok(response) if response.success)
    }
}

/// Errors returned by control-plane clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    /// The worker answered with a status other than 200 or 201.
    #[error("control plane {path} returned status {status}")]
    Status {
        /// Endpoint path.
        path: String,
        /// HTTP status code.
        status: u16,
    },

    /// The request could not be sent or timed out.
    #[error("control plane {path} unreachable: {message}")]
    Transport {
        /// Endpoint path.
        path: String,
        /// Transport error message.
        message: String,
    },

    /// The worker answered with `success = false`.
    #[error("control plane {path} reported failure")]
    Rejected {
        /// Endpoint path.
        path: String,
    },

    /// The response body could not be decoded.
    #[error("control plane response could not be decoded: {0}")]
    Decode(String),
}

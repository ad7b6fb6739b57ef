//! Engine settings.
//!
//! Every field has a default, so a settings file only needs to name the
//! values it overrides:
//!
//! ```json
//! {
//!   "poll_interval_ms": 2000,
//!   "swap": { "wait_timeout_secs": 40 }
//! }
//! ```

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Io {
        /// File that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings text is not valid JSON for [`OscSettings`].
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Offending field path.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSettings {
    /// Delay between two polls of one task.
    pub poll_interval_ms: u64,
    /// Age after which an unfinished task is failed.
    pub task_expired_after_secs: u64,
    /// Run a full verification before swapping (migration service only).
    pub enable_full_verify: bool,
    /// Replication monitoring.
    pub monitor: MonitorSettings,
    /// Table swap.
    pub swap: SwapSettings,
    /// Worker control-plane HTTP client.
    pub control_plane: ControlPlaneSettings,
    /// Worker provisioning.
    pub worker: WorkerSettings,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            task_expired_after_secs: 432_000,
            enable_full_verify: false,
            monitor: MonitorSettings::default(),
            swap: SwapSettings::default(),
            control_plane: ControlPlaneSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

/// Replication monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// How long the backend may stay silent before the task fails.
    pub failure_timeout_secs: u64,
    /// Maximum checkpoint lag for a worker to count as caught up.
    pub worker_checkpoint_lag_secs: u64,
    /// Maximum checkpoint lag for the migration service to count as caught
    /// up; the service publishes checkpoints less often.
    pub service_checkpoint_lag_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            failure_timeout_secs: 300,
            worker_checkpoint_lag_secs: 5,
            service_checkpoint_lag_secs: 25,
        }
    }
}

/// Table swap settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapSettings {
    /// Bound on waiting for replication to pass the safe checkpoint.
    pub wait_timeout_secs: u64,
    /// Delay between two checkpoint checks while waiting.
    pub check_interval_ms: u64,
    /// Oldest engine version supporting lock-then-rename.
    pub lock_table_min_version: String,
    /// Delay between two sweeps for blocking sessions.
    pub session_kill_interval_ms: u64,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 25,
            check_interval_ms: 500,
            lock_table_min_version: "4.2.5".to_owned(),
            session_kill_interval_ms: 1_000,
        }
    }
}

/// Per-call timeouts of the worker control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    /// Connection establishment timeout.
    pub connect_timeout_ms: u64,
    /// `GET /heartbeat` timeout.
    pub heartbeat_timeout_ms: u64,
    /// `POST /start` timeout.
    pub start_timeout_ms: u64,
    /// `GET /monitor` timeout.
    pub monitor_timeout_ms: u64,
    /// `POST /update` timeout.
    pub update_timeout_ms: u64,
    /// `GET /clear` timeout.
    pub clear_timeout_ms: u64,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            heartbeat_timeout_ms: 3_000,
            start_timeout_ms: 10_000,
            monitor_timeout_ms: 5_000,
            update_timeout_ms: 5_000,
            clear_timeout_ms: 5_000,
        }
    }
}

/// Worker provisioning settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Port the worker control plane listens on inside the pod.
    pub listen_port: u16,
    /// Worker container image.
    pub image: String,
    /// Resource type requested from the resource manager.
    pub resource_type: String,
    /// Namespace pods are created in.
    pub namespace: String,
    /// Region used when the datasource declares none.
    pub default_region: String,
    /// Resource group inside the region.
    pub group: String,
    /// Requested CPU in millicores.
    pub cpu_millis: u32,
    /// Requested memory in MiB.
    pub memory_mb: u32,
    /// Expose the listen port on the host.
    pub enable_port_mapper: bool,
    /// First host port handed out by the port mapper.
    pub mapped_port_base: u16,
    /// Number of host ports available to the port mapper.
    pub mapped_port_range: u16,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            listen_port: 18_001,
            image: "ghostswap/osc-worker:latest".to_owned(),
            resource_type: "k8s_pod".to_owned(),
            namespace: "ghostswap".to_owned(),
            default_region: "default".to_owned(),
            group: "default".to_owned(),
            cpu_millis: 2_000,
            memory_mb: 8_192,
            enable_port_mapper: false,
            mapped_port_base: 20_000,
            mapped_port_range: 1_000,
        }
    }
}

impl OscSettings {
    /// Parses settings from JSON text and validates them.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed JSON and
    /// [`SettingsError::Invalid`] for out-of-range values.
    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a JSON file.
    ///
    /// The parent directory is opened with ambient authority and the file is
    /// read through it.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] when the file cannot be read, plus any
    /// error from [`OscSettings::from_json_str`].
    pub fn from_path(path: &Utf8Path) -> Result<Self, SettingsError> {
        let io_error = |source| SettingsError::Io {
            path: path.to_string(),
            source,
        };
        let parent = match path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        };
        let file_name = path.file_name().ok_or_else(|| {
            io_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "settings path has no file name",
            ))
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
        let text = dir.read_to_string(file_name).map_err(io_error)?;
        Self::from_json_str(&text)
    }

    /// Checks that intervals and timeouts are usable.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let checks: [(&'static str, bool); 8] = [
            ("poll_interval_ms", self.poll_interval_ms > 0),
            ("task_expired_after_secs", self.task_expired_after_secs > 0),
            ("monitor.failure_timeout_secs", self.monitor.failure_timeout_secs > 0),
            ("swap.wait_timeout_secs", self.swap.wait_timeout_secs > 0),
            ("swap.check_interval_ms", self.swap.check_interval_ms > 0),
            (
                "swap.session_kill_interval_ms",
                self.swap.session_kill_interval_ms > 0,
            ),
            ("worker.listen_port", self.worker.listen_port > 0),
            (
                "worker.mapped_port_range",
                !self.worker.enable_port_mapper || self.worker.mapped_port_range > 0,
            ),
        ];
        if let Some((field, _)) = checks.into_iter().find(|(_, ok)| !ok) {
            return Err(SettingsError::Invalid {
                field,
                reason: "must be greater than zero",
            });
        }
        if self.swap.lock_table_min_version.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "swap.lock_table_min_version",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    /// Returns the delay between two polls of one task.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the age after which an unfinished task is failed.
    #[must_use]
    pub fn task_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.task_expired_after_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_documented_tunables() {
        let settings = OscSettings::default();

        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
        assert_eq!(settings.task_expired_after_secs, 432_000);
        assert_eq!(settings.monitor.failure_timeout_secs, 300);
        assert_eq!(settings.monitor.worker_checkpoint_lag_secs, 5);
        assert_eq!(settings.swap.wait_timeout_secs, 25);
        assert_eq!(settings.swap.lock_table_min_version, "4.2.5");
        assert_eq!(settings.worker.listen_port, 18_001);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let settings = OscSettings::from_json_str(
            r#"{"poll_interval_ms": 250, "swap": {"wait_timeout_secs": 40}}"#,
        )
        .expect("settings should parse");

        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.swap.wait_timeout_secs, 40);
        assert_eq!(settings.swap.check_interval_ms, 500);
        assert_eq!(settings.control_plane.start_timeout_ms, 10_000);
    }

    #[rstest]
    #[case(r#"{"poll_interval_ms": 0}"#, "poll_interval_ms")]
    #[case(r#"{"swap": {"wait_timeout_secs": 0}}"#, "swap.wait_timeout_secs")]
    #[case(
        r#"{"worker": {"enable_port_mapper": true, "mapped_port_range": 0}}"#,
        "worker.mapped_port_range"
    )]
    #[case(
        r#"{"swap": {"lock_table_min_version": " "}}"#,
        "swap.lock_table_min_version"
    )]
    fn rejects_out_of_range_values(#[case] json: &str, #[case] expected_field: &str) {
        let result = OscSettings::from_json_str(json);

        assert!(matches!(
            result,
            Err(SettingsError::Invalid { field, .. }) if field == expected_field
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        let result = OscSettings::from_json_str("{not json");

        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let result = OscSettings::from_path(Utf8Path::new("/nonexistent/ghostswap.json"));

        let Err(SettingsError::Io { path, .. }) = result else {
            panic!("expected an I/O error");
        };
        assert_eq!(path, "/nonexistent/ghostswap.json");
    }
}

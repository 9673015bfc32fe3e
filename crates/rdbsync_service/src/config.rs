//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Configuration for the RdbSync service.
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Idle time after which an unused syncer is evicted.
    #[serde(with = "millis")]
    pub syncer_timeout: Duration,
    /// How long a remote query may wait for the peer.
    #[serde(with = "millis")]
    pub remote_query_timeout: Duration,
    /// Syncers alive across all processes.
    pub max_syncer_num: usize,
    /// Syncers alive per process.
    pub max_syncer_per_process: usize,
    /// Key derivation iterations for encrypted stores.
    pub iterate_times: u32,
    /// Directory under which store data paths are derived.
    pub data_root: PathBuf,
    /// Application type recorded in store metadata.
    pub app_type: String,
}

impl ServiceConfig {
    /// Creates a configuration rooted at `data_root` with default limits.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            syncer_timeout: Duration::from_secs(60),
            remote_query_timeout: Duration::from_secs(30),
            max_syncer_num: 50,
            max_syncer_per_process: 10,
            iterate_times: 10_000,
            data_root: data_root.into(),
            app_type: "harmony".to_string(),
        }
    }

    /// Parses a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> ServiceResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| ServiceError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.syncer_timeout.is_zero() {
            return Err(ServiceError::Config("syncer_timeout must be positive".into()));
        }
        if self.max_syncer_num == 0 || self.max_syncer_per_process == 0 {
            return Err(ServiceError::Config("syncer limits must be positive".into()));
        }
        if self.max_syncer_per_process > self.max_syncer_num {
            return Err(ServiceError::Config(
                "max_syncer_per_process exceeds max_syncer_num".into(),
            ));
        }
        Ok(())
    }

    /// Sets the idle eviction timeout.
    pub fn with_syncer_timeout(mut self, timeout: Duration) -> Self {
        self.syncer_timeout = timeout;
        self
    }

    /// Sets the remote query timeout.
    pub fn with_remote_query_timeout(mut self, timeout: Duration) -> Self {
        self.remote_query_timeout = timeout;
        self
    }

    /// Sets the global syncer cap.
    pub fn with_max_syncer_num(mut self, max: usize) -> Self {
        self.max_syncer_num = max;
        self
    }

    /// Sets the per-process syncer cap.
    pub fn with_max_syncer_per_process(mut self, max: usize) -> Self {
        self.max_syncer_per_process = max;
        self
    }

    /// Sets the key derivation iterations.
    pub fn with_iterate_times(mut self, iterate_times: u32) -> Self {
        self.iterate_times = iterate_times;
        self
    }

    /// Sets the application type.
    pub fn with_app_type(mut self, app_type: impl Into<String>) -> Self {
        self.app_type = app_type.into();
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new("/data/service/el1/public/database")
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

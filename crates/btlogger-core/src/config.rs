//! Receiver configuration
//!
//! All durations serialise as whole milliseconds so that TOML files and
//! environment overrides stay readable (`retry_interval = 3000`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ConfigError;

/// Service advertised by producer firmware
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc);
/// Characteristic producers notify log frames on
pub const DEFAULT_LOG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x87654321_4321_4321_4321_cba987654321);

/// Name fragments that mark a producer even when it does not advertise the
/// service UUID
pub const DEFAULT_ALLOW_PATTERNS: &[&str] = &["BTLogger", "ESP32", "WeatherStation", "MyDevice", "_v"];

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ----------------------------------------------------------------------------
// Link Configuration
// ----------------------------------------------------------------------------

/// Discovery and connection behaviour of the connection manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub service_uuid: Uuid,
    pub log_characteristic_uuid: Uuid,
    /// Substrings of advertised names accepted as producers
    pub allow_patterns: Vec<String>,
    /// Connect to discovered producers without being asked
    pub auto_connect: bool,
    /// Minimum spacing between automatic connection attempts
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,
    /// Upper bound for acquiring the link of one device
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,
    /// How long a scan runs before it is stopped
    #[serde(with = "duration_ms")]
    pub scan_duration: Duration,
    /// Idle time after which scanning restarts while nothing is connected
    #[serde(with = "duration_ms")]
    pub scan_restart_interval: Duration,
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
    /// Discovered candidates silent for longer than this are forgotten
    #[serde(with = "duration_ms")]
    pub candidate_ttl: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            log_characteristic_uuid: DEFAULT_LOG_CHARACTERISTIC_UUID,
            allow_patterns: DEFAULT_ALLOW_PATTERNS.iter().map(|p| p.to_string()).collect(),
            auto_connect: true,
            retry_interval: Duration::from_secs(3),
            connection_timeout: Duration::from_secs(10),
            scan_duration: Duration::from_secs(10),
            scan_restart_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(1),
            candidate_ttl: Duration::from_secs(60),
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    pub fn with_log_characteristic_uuid(mut self, uuid: Uuid) -> Self {
        self.log_characteristic_uuid = uuid;
        self
    }

    pub fn with_allow_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    pub fn with_scan_restart_interval(mut self, interval: Duration) -> Self {
        self.scan_restart_interval = interval;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_candidate_ttl(mut self, ttl: Duration) -> Self {
        self.candidate_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::Invalid("connection_timeout must be non-zero".into()));
        }
        if self.scan_duration.is_zero() {
            return Err(ConfigError::Invalid("scan_duration must be non-zero".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::Invalid("health_check_interval must be non-zero".into()));
        }
        if self.allow_patterns.iter().any(|p| p.is_empty()) {
            // An empty pattern would match every advertisement
            return Err(ConfigError::Invalid("allow_patterns may not contain empty entries".into()));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Storage Configuration
// ----------------------------------------------------------------------------

/// Session file storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per device
    pub root: PathBuf,
    /// A session part is rotated before it would grow past this many bytes
    pub rotation_threshold: u64,
    /// Cap on parts per session; `None` rotates forever
    pub max_files_per_session: Option<u32>,
    /// Lines returned by a single load request
    pub max_loaded_lines: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("logs"),
            rotation_threshold: 1024 * 1024,
            max_files_per_session: None,
            max_loaded_lines: 1000,
        }
    }
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    pub fn with_max_files_per_session(mut self, max: Option<u32>) -> Self {
        self.max_files_per_session = max;
        self
    }

    pub fn with_max_loaded_lines(mut self, lines: usize) -> Self {
        self.max_loaded_lines = lines;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rotation_threshold == 0 {
            return Err(ConfigError::Invalid("rotation_threshold must be non-zero".into()));
        }
        if self.max_files_per_session == Some(0) {
            return Err(ConfigError::Invalid("max_files_per_session must be at least 1".into()));
        }
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage root may not be empty".into()));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Scheduler Configuration
// ----------------------------------------------------------------------------

/// Mailbox sizing and timing of the two execution contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub mailbox_capacity: usize,
    /// Longest a sender waits for mailbox space
    #[serde(with = "duration_ms")]
    pub send_timeout: Duration,
    /// Longest a context blocks on its mailbox before doing other work
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Grace period for both contexts to exit before they are aborted
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 10,
            send_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // tokio mpsc panics on a zero capacity
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("mailbox_capacity must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

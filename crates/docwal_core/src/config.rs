//! WAL configuration.
//!
//! [`WalConfig`] is fixed when the [`crate::LogfileManager`] is opened.
//! The subset exposed through the properties interface is mirrored into
//! [`LiveSettings`], which background threads read on every iteration so
//! updates take effect without a restart.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Smallest accepted logfile size.
pub const MIN_LOGFILE_SIZE: u64 = 64 * 1024;

/// Largest accepted logfile size.
pub const MAX_LOGFILE_SIZE: u64 = 2 << 30;

/// Largest single marker the WAL accepts, even with oversize entries allowed.
pub const MAX_ENTRY_SIZE: u64 = 2 << 30;

/// Lower bound for the synchronizer interval.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(5);

/// Configuration for opening a WAL directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WalConfig {
    /// Directory holding logfiles, the lock file and the shutdown file.
    pub directory: PathBuf,

    /// Capacity of a standard logfile in bytes.
    #[serde(alias = "filesize")]
    pub logfile_size: u64,

    /// Number of empty logfiles kept ready by the allocator thread.
    #[serde(alias = "logfiles")]
    pub reserve_logfiles: u64,

    /// Number of collected logfiles kept before the remover deletes them.
    pub historic_logfiles: u64,

    /// Bytes left unused at the end of every logfile.
    #[serde(alias = "reserve")]
    pub reserve_space: u64,

    /// Whether markers bigger than a logfile get a dedicated logfile.
    pub allow_oversize_entries: bool,

    /// How often the synchronizer flushes committed bytes.
    #[serde(with = "millis")]
    pub sync_interval: Duration,

    /// Pending collector operations that activate write throttling (0 = off).
    pub throttle_when_pending: u64,

    /// How long a throttled writer waits before giving up.
    #[serde(with = "millis")]
    pub throttle_wait: Duration,

    /// How long writers and flushes wait for the background threads.
    #[serde(with = "millis")]
    pub flush_timeout: Duration,

    /// Skip unreadable logfiles on open instead of failing.
    pub ignore_logfile_errors: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            logfile_size: 32 * 1024 * 1024, // 32 MB
            reserve_logfiles: 3,
            historic_logfiles: 10,
            reserve_space: 0,
            allow_oversize_entries: true,
            sync_interval: Duration::from_millis(100),
            throttle_when_pending: 0, // disabled
            throttle_wait: Duration::from_secs(15),
            flush_timeout: Duration::from_secs(15),
            ignore_logfile_errors: false,
        }
    }
}

impl WalConfig {
    /// Creates a configuration with default values for `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sets the logfile capacity.
    #[must_use]
    pub fn logfile_size(mut self, size: u64) -> Self {
        self.logfile_size = size;
        self
    }

    /// Sets the number of reserve logfiles.
    #[must_use]
    pub fn reserve_logfiles(mut self, count: u64) -> Self {
        self.reserve_logfiles = count;
        self
    }

    /// Sets the number of historic logfiles.
    #[must_use]
    pub fn historic_logfiles(mut self, count: u64) -> Self {
        self.historic_logfiles = count;
        self
    }

    /// Sets the unused space margin at the end of every logfile.
    #[must_use]
    pub fn reserve_space(mut self, bytes: u64) -> Self {
        self.reserve_space = bytes;
        self
    }

    /// Sets whether oversize entries are allowed.
    #[must_use]
    pub fn allow_oversize_entries(mut self, value: bool) -> Self {
        self.allow_oversize_entries = value;
        self
    }

    /// Sets the synchronizer interval.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the throttling threshold.
    #[must_use]
    pub fn throttle_when_pending(mut self, pending: u64) -> Self {
        self.throttle_when_pending = pending;
        self
    }

    /// Sets how long throttled writers wait.
    #[must_use]
    pub fn throttle_wait(mut self, wait: Duration) -> Self {
        self.throttle_wait = wait;
        self
    }

    /// Sets how long writers wait for a writable logfile.
    #[must_use]
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Sets whether unreadable logfiles are skipped on open.
    #[must_use]
    pub fn ignore_logfile_errors(mut self, value: bool) -> Self {
        self.ignore_logfile_errors = value;
        self
    }

    /// Checks every value against its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first rejected value.
    pub fn validate(&self) -> CoreResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(CoreError::invalid_config("directory is required"));
        }
        validate_logfile_size(self.logfile_size)?;
        if self.reserve_space >= self.logfile_size / 2 {
            return Err(CoreError::invalid_config(format!(
                "reserve space {} must be less than half the logfile size {}",
                self.reserve_space, self.logfile_size
            )));
        }
        validate_sync_interval(self.sync_interval)?;
        if self.flush_timeout.is_zero() {
            return Err(CoreError::invalid_config("flush timeout must be positive"));
        }
        Ok(())
    }
}

pub(crate) fn validate_logfile_size(size: u64) -> CoreResult<()> {
    if !(MIN_LOGFILE_SIZE..=MAX_LOGFILE_SIZE).contains(&size) {
        return Err(CoreError::invalid_config(format!(
            "logfile size {size} outside of [{MIN_LOGFILE_SIZE}, {MAX_LOGFILE_SIZE}]"
        )));
    }
    Ok(())
}

pub(crate) fn validate_sync_interval(interval: Duration) -> CoreResult<()> {
    if interval < MIN_SYNC_INTERVAL {
        return Err(CoreError::invalid_config(format!(
            "sync interval {interval:?} below minimum {MIN_SYNC_INTERVAL:?}"
        )));
    }
    Ok(())
}

/// Runtime-adjustable settings shared with the background threads.
#[derive(Debug)]
pub struct LiveSettings {
    logfile_size: AtomicU64,
    reserve_logfiles: AtomicU64,
    historic_logfiles: AtomicU64,
    allow_oversize_entries: AtomicBool,
    throttle_wait_ms: AtomicU64,
    sync_interval_ms: AtomicU64,
}

impl LiveSettings {
    /// Seeds the live settings from the opening configuration.
    #[must_use]
    pub fn from_config(config: &WalConfig) -> Self {
        Self {
            logfile_size: AtomicU64::new(config.logfile_size),
            reserve_logfiles: AtomicU64::new(config.reserve_logfiles),
            historic_logfiles: AtomicU64::new(config.historic_logfiles),
            allow_oversize_entries: AtomicBool::new(config.allow_oversize_entries),
            throttle_wait_ms: AtomicU64::new(duration_ms(config.throttle_wait)),
            sync_interval_ms: AtomicU64::new(duration_ms(config.sync_interval)),
        }
    }

    /// Capacity of newly created standard logfiles.
    pub fn logfile_size(&self) -> u64 {
        self.logfile_size.load(Ordering::Relaxed)
    }

    /// Number of empty logfiles to keep in reserve.
    pub fn reserve_logfiles(&self) -> u64 {
        self.reserve_logfiles.load(Ordering::Relaxed)
    }

    /// Number of collected logfiles to retain.
    pub fn historic_logfiles(&self) -> u64 {
        self.historic_logfiles.load(Ordering::Relaxed)
    }

    /// Whether oversize markers get a dedicated logfile.
    pub fn allow_oversize_entries(&self) -> bool {
        self.allow_oversize_entries.load(Ordering::Relaxed)
    }

    /// Maximum time a throttled writer waits.
    pub fn throttle_wait(&self) -> Duration {
        Duration::from_millis(self.throttle_wait_ms.load(Ordering::Relaxed))
    }

    /// Synchronizer interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn set_logfile_size(&self, size: u64) {
        self.logfile_size.store(size, Ordering::Relaxed);
    }

    pub(crate) fn set_reserve_logfiles(&self, count: u64) {
        self.reserve_logfiles.store(count, Ordering::Relaxed);
    }

    pub(crate) fn set_historic_logfiles(&self, count: u64) {
        self.historic_logfiles.store(count, Ordering::Relaxed);
    }

    pub(crate) fn set_allow_oversize_entries(&self, value: bool) {
        self.allow_oversize_entries.store(value, Ordering::Relaxed);
    }

    pub(crate) fn set_throttle_wait(&self, wait: Duration) {
        self.throttle_wait_ms.store(duration_ms(wait), Ordering::Relaxed);
    }

    pub(crate) fn set_sync_interval(&self, interval: Duration) {
        self.sync_interval_ms
            .store(duration_ms(interval), Ordering::Relaxed);
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::duration_ms(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_needs_directory() {
        let config = WalConfig::default();
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
        assert!(WalConfig::new("/tmp/wal").validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = WalConfig::new("/tmp/wal")
            .logfile_size(1024 * 1024)
            .reserve_logfiles(1)
            .throttle_when_pending(500)
            .allow_oversize_entries(false);

        assert_eq!(config.logfile_size, 1024 * 1024);
        assert_eq!(config.reserve_logfiles, 1);
        assert_eq!(config.throttle_when_pending, 500);
        assert!(!config.allow_oversize_entries);
    }

    #[test]
    fn logfile_size_bounds() {
        assert!(WalConfig::new("/w").logfile_size(1024).validate().is_err());
        assert!(WalConfig::new("/w")
            .logfile_size(MAX_LOGFILE_SIZE + 1)
            .validate()
            .is_err());
        assert!(WalConfig::new("/w")
            .logfile_size(MIN_LOGFILE_SIZE)
            .validate()
            .is_ok());
    }

    #[test]
    fn sync_interval_minimum() {
        let config = WalConfig::new("/w").sync_interval(Duration::from_millis(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_keys_and_aliases() {
        let config: WalConfig = serde_json::from_str(
            r#"{"directory": "/var/wal", "filesize": 1048576, "logfiles": 2,
                "reserve": 4096, "syncInterval": 50}"#,
        )
        .unwrap();

        assert_eq!(config.directory, PathBuf::from("/var/wal"));
        assert_eq!(config.logfile_size, 1_048_576);
        assert_eq!(config.reserve_logfiles, 2);
        assert_eq!(config.reserve_space, 4096);
        assert_eq!(config.sync_interval, Duration::from_millis(50));
        assert_eq!(config.historic_logfiles, 10);
        config.validate().unwrap();
    }

    #[test]
    fn live_settings_follow_updates() {
        let settings = LiveSettings::from_config(&WalConfig::new("/w"));
        settings.set_logfile_size(1_048_576);
        settings.set_throttle_wait(Duration::from_millis(250));
        assert_eq!(settings.logfile_size(), 1_048_576);
        assert_eq!(settings.throttle_wait(), Duration::from_millis(250));
    }
}

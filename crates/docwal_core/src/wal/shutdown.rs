//! The `SHUTDOWN` state file.
//!
//! Written on flush requests, after every collected logfile and at
//! shutdown. On startup it seeds the tick clock and tells recovery which
//! logfiles are already collected.

use crate::error::CoreResult;
use crate::types::{LogfileId, Tick};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Persisted WAL state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownInfo {
    /// Last tick handed out.
    pub tick: Tick,
    /// Newest collected logfile.
    pub last_collected: LogfileId,
    /// Newest sealed logfile.
    pub last_sealed: LogfileId,
    /// Unix time in seconds of a clean shutdown. Absent for intermediate
    /// writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_time: Option<u64>,
}

impl ShutdownInfo {
    /// Reads the file at `path`. Returns `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> CoreResult<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                trace!("no shutdown file found");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let mut info: Self = serde_json::from_slice(&data)?;
        // a sealed id below the collected one would re-collect logfiles
        info.last_sealed = info.last_sealed.max(info.last_collected);
        match info.shutdown_time {
            Some(time) => trace!(shutdown_time = time, "previous shutdown found"),
            None => trace!("no previous shutdown time found"),
        }
        Ok(Some(info))
    }

    /// Stamps the current time as the shutdown time.
    #[must_use]
    pub fn with_shutdown_time(mut self) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.shutdown_time = Some(now);
        self
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        assert_eq!(ShutdownInfo::read(&dir.path().join("SHUTDOWN")).unwrap(), None);
    }

    #[test]
    fn json_layout() {
        let info = ShutdownInfo {
            tick: Tick::new(42),
            last_collected: LogfileId::new(3),
            last_sealed: LogfileId::new(5),
            shutdown_time: None,
        };
        let json: serde_json::Value = serde_json::from_slice(&info.to_json().unwrap()).unwrap();
        assert_eq!(json["tick"], 42);
        assert_eq!(json["lastCollected"], 3);
        assert_eq!(json["lastSealed"], 5);
        assert!(json.get("shutdownTime").is_none());
    }

    #[test]
    fn read_raises_sealed_to_collected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("SHUTDOWN");
        std::fs::write(&path, br#"{"tick": 9, "lastCollected": 7, "lastSealed": 4}"#).unwrap();

        let info = ShutdownInfo::read(&path).unwrap().unwrap();
        assert_eq!(info.last_sealed, LogfileId::new(7));
        assert_eq!(info.tick, Tick::new(9));
    }

    #[test]
    fn shutdown_time_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("SHUTDOWN");
        let info = ShutdownInfo::default().with_shutdown_time();
        std::fs::write(&path, info.to_json().unwrap()).unwrap();

        let read = ShutdownInfo::read(&path).unwrap().unwrap();
        assert!(read.shutdown_time.is_some());
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("SHUTDOWN");
        std::fs::write(&path, b"not json").unwrap();
        assert!(ShutdownInfo::read(&path).is_err());
    }
}

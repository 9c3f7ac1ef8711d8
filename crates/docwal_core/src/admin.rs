//! Request and response bodies of the WAL admin endpoints.
//!
//! The HTTP layer lives elsewhere; these types fix the JSON contract and
//! forward to the [`LogfileManager`].

use crate::error::CoreResult;
use crate::types::LogfileId;
use crate::wal::LogfileManager;
use serde::{Deserialize, Serialize};

/// `GET /_admin/wal/properties` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalProperties {
    /// Whether oversize markers get a dedicated logfile.
    pub allow_oversize_entries: bool,
    /// Capacity of new logfiles in bytes.
    pub logfile_size: u64,
    /// Collected logfiles kept around.
    pub historic_logfiles: u64,
    /// Empty logfiles kept in reserve.
    pub reserve_logfiles: u64,
    /// Maximum throttle wait in milliseconds.
    pub throttle_wait: u64,
    /// Pending collector operations that trigger throttling, zero for off.
    pub throttle_when_pending: u64,
    /// Synchronizer interval in milliseconds.
    pub sync_interval: u64,
}

/// `PUT /_admin/wal/properties` body. Absent fields stay unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PropertiesUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_oversize_entries: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logfile_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historic_logfiles: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_logfiles: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_wait: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_when_pending: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<u64>,
}

/// `PUT /_admin/wal/flush` body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlushRequest {
    /// Wait until the sealed logfile is synced.
    pub wait_for_sync: bool,
    /// Wait until the sealed logfile is collected.
    pub wait_for_collector: bool,
}

/// `GET /_admin/wal/transactions` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsInfo {
    /// Number of active transactions.
    pub running_transactions: usize,
    /// Smallest last-collected logfile id pinned by a transaction.
    pub min_last_collected: Option<LogfileId>,
    /// Smallest last-sealed logfile id pinned by a write transaction.
    pub min_last_sealed: Option<LogfileId>,
}

/// Handles `GET properties`.
pub fn get_properties(manager: &LogfileManager) -> WalProperties {
    manager.properties()
}

/// Handles `PUT properties` with a JSON body and returns the new values.
///
/// # Errors
///
/// Returns a serialization error for a malformed body and
/// `InvalidConfig` for out-of-range values.
pub fn put_properties(manager: &LogfileManager, body: &[u8]) -> CoreResult<WalProperties> {
    let update: PropertiesUpdate = serde_json::from_slice(body)?;
    manager.update_properties(&update)
}

/// Handles `PUT flush` with a JSON body. An empty body flushes without
/// waiting.
///
/// # Errors
///
/// Returns the flush error, `LockTimeout` included.
pub fn put_flush(manager: &LogfileManager, body: &[u8]) -> CoreResult<()> {
    let request: FlushRequest = if body.iter().all(u8::is_ascii_whitespace) {
        FlushRequest::default()
    } else {
        serde_json::from_slice(body)?
    };
    manager.flush(request.wait_for_sync, request.wait_for_collector, false)
}

/// Handles `GET transactions`.
pub fn get_transactions(manager: &LogfileManager) -> TransactionsInfo {
    let running = manager.running_transactions();
    TransactionsInfo {
        running_transactions: running.count,
        min_last_collected: running.min_last_collected,
        min_last_sealed: running.min_last_sealed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_json_is_camel_case() {
        let properties = WalProperties {
            allow_oversize_entries: true,
            logfile_size: 1_048_576,
            historic_logfiles: 10,
            reserve_logfiles: 3,
            throttle_wait: 15_000,
            throttle_when_pending: 0,
            sync_interval: 100,
        };
        let json = serde_json::to_value(properties).unwrap();
        assert_eq!(json["logfileSize"], 1_048_576);
        assert_eq!(json["allowOversizeEntries"], true);
        assert_eq!(json["throttleWhenPending"], 0);
    }

    #[test]
    fn partial_update_parses() {
        let update: PropertiesUpdate = serde_json::from_str(r#"{"logfileSize": 1048576}"#).unwrap();
        assert_eq!(update.logfile_size, Some(1_048_576));
        assert_eq!(update.sync_interval, None);
    }

    #[test]
    fn flush_request_defaults() {
        let request: FlushRequest = serde_json::from_str(r#"{"waitForSync": true}"#).unwrap();
        assert!(request.wait_for_sync);
        assert!(!request.wait_for_collector);
    }

    #[test]
    fn transactions_info_uses_null_for_missing_ids() {
        let info = TransactionsInfo {
            running_transactions: 0,
            min_last_collected: None,
            min_last_sealed: Some(LogfileId::new(4)),
        };
        let json = serde_json::to_value(info).unwrap();
        assert!(json["minLastCollected"].is_null());
        assert_eq!(json["minLastSealed"], 4);
    }
}

//! CLI command implementations.

pub mod config;
pub mod dump;
pub mod inspect;
pub mod verify;

use docwal_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// Reads a whole logfile without locking the directory. Bytes a running
/// manager appends afterwards are not seen.
pub(crate) fn read_logfile(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let backend = FileBackend::open_read_only(path)?;
    Ok(backend.read_all()?)
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

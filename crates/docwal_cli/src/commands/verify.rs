//! Verify command implementation.

use super::read_logfile;
use docwal_core::dir::list_logfiles;
use docwal_core::{LogfileId, MarkerIterator, WalMarker};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of logfiles checked.
    pub logfiles_checked: usize,
    /// Number of markers checked.
    pub markers_checked: usize,
    /// Problems that make a logfile unreadable.
    pub errors: Vec<String>,
    /// Problems recovery repairs on its own.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying WAL directory {}", path.display());
    println!();

    let result = verify_directory(path)?;

    println!("  Logfiles checked: {}", result.logfiles_checked);
    println!("  Markers checked:  {}", result.markers_checked);
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ WAL verification passed");
        Ok(())
    } else {
        println!("✗ WAL verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every logfile of the directory.
pub fn verify_directory(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let logfiles = list_logfiles(path)?;
    let last = logfiles.last().map(|(id, _)| *id);

    for (id, file) in &logfiles {
        let data = read_logfile(file)?;
        verify_logfile(*id, &data, Some(*id) == last, &mut result);
    }
    Ok(result)
}

fn verify_logfile(id: LogfileId, data: &[u8], is_last: bool, result: &mut VerifyResult) {
    result.logfiles_checked += 1;
    if data.is_empty() {
        result.warnings.push(format!("logfile {id} is empty"));
        return;
    }

    let mut iter = MarkerIterator::new(data);
    let mut index = 0usize;
    let mut last_tick = 0u64;
    let mut sealed = false;

    for decoded in iter.by_ref() {
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                result
                    .errors
                    .push(format!("logfile {id}: marker {index}: {err}"));
                return;
            }
        };
        result.markers_checked += 1;

        if index == 0 {
            match decoded.marker {
                WalMarker::Header { logfile_id } if logfile_id == id => {}
                WalMarker::Header { logfile_id } => result.errors.push(format!(
                    "logfile {id}: header names logfile {logfile_id}"
                )),
                _ => result
                    .errors
                    .push(format!("logfile {id}: first marker is not a header")),
            }
        }
        if sealed {
            result
                .errors
                .push(format!("logfile {id}: marker {index} follows the footer"));
        }

        let tick = decoded.tick.as_u64();
        if tick <= last_tick {
            result.errors.push(format!(
                "logfile {id}: tick {tick} at offset {} does not increase",
                decoded.offset
            ));
        }
        last_tick = tick;
        sealed = matches!(decoded.marker, WalMarker::Footer);
        index += 1;
    }

    let torn = data.len() as u64 - iter.valid_len();
    if torn > 0 {
        let message = format!("logfile {id}: {torn} torn bytes at the tail");
        if is_last && !sealed {
            result.warnings.push(message);
        } else {
            result.errors.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwal_core::{RevisionId, Tick, TransactionId};

    fn document(tick: u64, buf: &mut Vec<u8>) {
        WalMarker::Document {
            transaction_id: TransactionId::default(),
            key: format!("k{tick}"),
            revision: RevisionId::new(tick),
            body: vec![7; 8],
        }
        .encode_into(Tick::new(tick), buf)
        .unwrap();
    }

    fn logfile(id: u64, ticks: &[u64], sealed: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        WalMarker::Header {
            logfile_id: LogfileId::new(id),
        }
        .encode_into(Tick::new(id), &mut buf)
        .unwrap();
        for tick in ticks {
            document(*tick, &mut buf);
        }
        if sealed {
            let footer_tick = ticks.last().copied().unwrap_or(id) + 1;
            WalMarker::Footer
                .encode_into(Tick::new(footer_tick), &mut buf)
                .unwrap();
        }
        buf
    }

    #[test]
    fn clean_logfile_passes() {
        let mut result = VerifyResult::default();
        verify_logfile(LogfileId::new(3), &logfile(3, &[4, 5, 6], true), false, &mut result);
        assert!(result.is_ok());
        assert_eq!(result.markers_checked, 5);
    }

    #[test]
    fn checksum_error_fails() {
        let mut data = logfile(3, &[4], true);
        let mid = data.len() / 2;
        data[mid] ^= 0x55;

        let mut result = VerifyResult::default();
        verify_logfile(LogfileId::new(3), &data, false, &mut result);
        assert!(!result.is_ok());
    }

    #[test]
    fn mismatched_header_fails() {
        let mut result = VerifyResult::default();
        verify_logfile(LogfileId::new(9), &logfile(3, &[4], false), true, &mut result);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn torn_tail_of_open_logfile_is_a_warning() {
        let mut data = logfile(3, &[4, 5], false);
        data.truncate(data.len() - 2);

        let mut result = VerifyResult::default();
        verify_logfile(LogfileId::new(3), &data, true, &mut result);
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);

        let mut result = VerifyResult::default();
        verify_logfile(LogfileId::new(3), &data, false, &mut result);
        assert!(!result.is_ok());
    }
}

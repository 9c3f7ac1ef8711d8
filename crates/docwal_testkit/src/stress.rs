//! Stress tests for docwal.
//!
//! Many writers share one logfile manager. The checks verify that every
//! marker gets its own tick and that logfiles hold ticks in file order.

use crate::fixtures::TestWal;
use docwal_core::{MarkerIterator, Tick};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestResult {
    /// Total writes attempted.
    pub total_writes: usize,
    /// Writes that failed.
    pub failed_writes: usize,
    /// Whether no two writes received the same tick.
    pub ticks_unique: bool,
    /// Whether every writer saw its own ticks strictly increase.
    pub ticks_increase_per_writer: bool,
    /// Total duration.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Writes per second.
    pub writes_per_second: f64,
}

impl StressTestResult {
    /// Returns true if no write failed and every tick check held.
    pub fn passed(&self) -> bool {
        self.failed_writes == 0 && self.ticks_unique && self.ticks_increase_per_writer
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total writes: {}", self.total_writes);
        println!("Failed: {}", self.failed_writes);
        println!("Ticks unique: {}", self.ticks_unique);
        println!("Ticks increase per writer: {}", self.ticks_increase_per_writer);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} writes/sec", self.writes_per_second);
    }

    /// Serializes the result for machine-readable reports.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent writer threads.
    pub writers: usize,
    /// Writes per thread.
    pub writes_per_writer: usize,
    /// Body size of each document.
    pub body_size: usize,
    /// Whether writes wait for the synchronizer.
    pub wait_for_sync: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            writes_per_writer: 250,
            body_size: 64,
            wait_for_sync: false,
        }
    }
}

/// Runs concurrent document writers against `wal`.
pub fn concurrent_writes(wal: &Arc<TestWal>, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();

    let handles: Vec<_> = (0..config.writers)
        .map(|writer| {
            let wal = Arc::clone(wal);
            let config = config.clone();
            thread::spawn(move || {
                let body = vec![writer as u8; config.body_size];
                let mut ticks = Vec::with_capacity(config.writes_per_writer);
                let mut failed = 0;
                for i in 0..config.writes_per_writer {
                    let key = format!("w{writer}-{i}");
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        wal.write_in_transaction(
                            Default::default(),
                            &key,
                            &body,
                            config.wait_for_sync,
                        )
                    }));
                    match result {
                        Ok(info) => ticks.push(info.tick),
                        Err(_) => failed += 1,
                    }
                }
                (ticks, failed)
            })
        })
        .collect();

    let mut all_ticks = HashSet::new();
    let mut ticks_unique = true;
    let mut ticks_increase_per_writer = true;
    let mut failed_writes = 0;
    for handle in handles {
        let (ticks, failed) = handle.join().expect("Writer thread panicked");
        failed_writes += failed;
        if !ticks.windows(2).all(|pair| pair[0] < pair[1]) {
            ticks_increase_per_writer = false;
        }
        for tick in ticks {
            if !all_ticks.insert(tick) {
                ticks_unique = false;
            }
        }
    }

    let duration = start.elapsed();
    let total_writes = config.writers * config.writes_per_writer;
    StressTestResult {
        total_writes,
        failed_writes,
        ticks_unique,
        ticks_increase_per_writer,
        duration,
        writes_per_second: if duration.as_secs_f64() > 0.0 {
            total_writes as f64 / duration.as_secs_f64()
        } else {
            0.0
        },
    }
}

/// Reads every logfile still present in id order and returns true if the
/// ticks of all markers strictly increase across them.
pub fn ticks_increase_on_disk(wal: &TestWal) -> bool {
    let mut last = Tick::ZERO;
    for logfile in wal.manager.logfiles() {
        let Ok(data) = logfile.read_all() else {
            return false;
        };
        for decoded in MarkerIterator::new(&data) {
            let Ok(decoded) = decoded else {
                return false;
            };
            if decoded.tick <= last {
                return false;
            }
            last = decoded.tick;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TEST_TIMEOUT;

    #[test]
    fn concurrent_writers_get_unique_ticks() {
        let wal = Arc::new(TestWal::new());
        let result = concurrent_writes(&wal, &StressConfig::default());
        result.print_summary("concurrent writers");

        assert!(result.passed(), "{}", result.to_json());
        assert_eq!(wal.document_count(), result.total_writes);
    }

    #[test]
    fn synced_writers_span_logfiles() {
        let wal = Arc::new(TestWal::with_config(|c| c.historic_logfiles(100)));
        let config = StressConfig {
            writers: 3,
            writes_per_writer: 150,
            body_size: 256,
            wait_for_sync: true,
        };
        let result = concurrent_writes(&wal, &config);
        assert!(result.passed(), "{}", result.to_json());

        wal.manager.wait_for_sync(TEST_TIMEOUT).unwrap();
        assert!(wal.manager.stats().logfiles_sealed() >= 1);
        assert!(ticks_increase_on_disk(&wal));
    }
}

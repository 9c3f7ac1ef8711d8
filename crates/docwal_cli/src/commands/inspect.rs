//! Inspect command implementation.

use super::{format_size, read_logfile};
use docwal_core::dir::{list_logfiles, shutdown_file};
use docwal_core::{MarkerIterator, ShutdownInfo, WalMarker};
use serde::Serialize;
use std::path::Path;

/// Summary of one logfile.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogfileSummary {
    /// Logfile id.
    pub id: u64,
    /// File size in bytes.
    pub size: u64,
    /// Number of decodable markers.
    pub markers: usize,
    /// Number of document and remove markers.
    pub documents: usize,
    /// Smallest tick in the file.
    pub tick_min: u64,
    /// Largest tick in the file.
    pub tick_max: u64,
    /// Whether the file ends with a footer.
    pub sealed: bool,
    /// Bytes past the last valid marker.
    pub torn_bytes: u64,
    /// Decoding error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// WAL directory inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// WAL directory.
    pub path: String,
    /// Persisted shutdown state, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<ShutdownInfo>,
    /// Logfiles in id order.
    pub logfiles: Vec<LogfileSummary>,
    /// Sum of all logfile sizes.
    pub total_size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No WAL directory found at {}", path.display()).into());
    }

    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the inspection result of a directory.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let shutdown = ShutdownInfo::read(&shutdown_file(path))?;

    let mut logfiles = Vec::new();
    for (id, file) in list_logfiles(path)? {
        let data = read_logfile(&file)?;
        logfiles.push(summarize(id.as_u64(), &data));
    }
    let total_size = logfiles.iter().map(|l| l.size).sum();

    Ok(InspectResult {
        path: path.display().to_string(),
        shutdown,
        logfiles,
        total_size,
    })
}

fn summarize(id: u64, data: &[u8]) -> LogfileSummary {
    let mut summary = LogfileSummary {
        id,
        size: data.len() as u64,
        markers: 0,
        documents: 0,
        tick_min: 0,
        tick_max: 0,
        sealed: false,
        torn_bytes: 0,
        error: None,
    };

    let mut iter = MarkerIterator::new(data);
    for decoded in iter.by_ref() {
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                summary.error = Some(err.to_string());
                break;
            }
        };
        let tick = decoded.tick.as_u64();
        if summary.markers == 0 {
            summary.tick_min = tick;
        }
        summary.tick_max = summary.tick_max.max(tick);
        summary.markers += 1;
        match decoded.marker {
            WalMarker::Document { .. } | WalMarker::Remove { .. } => summary.documents += 1,
            WalMarker::Footer => summary.sealed = true,
            _ => {}
        }
    }
    if summary.error.is_none() {
        summary.torn_bytes = summary.size - iter.valid_len();
    }
    summary
}

fn print_text_output(result: &InspectResult) {
    println!("docwal WAL Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!();

    match &result.shutdown {
        Some(info) => {
            println!("Shutdown state:");
            println!("  Last tick:      {}", info.tick);
            println!("  Last collected: {}", info.last_collected);
            println!("  Last sealed:    {}", info.last_sealed);
            match info.shutdown_time {
                Some(time) => println!("  Clean shutdown: {time}"),
                None => println!("  Clean shutdown: no"),
            }
        }
        None => println!("Shutdown state: none"),
    }
    println!();

    println!(
        "Logfiles: {} ({})",
        result.logfiles.len(),
        format_size(result.total_size)
    );
    for logfile in &result.logfiles {
        println!(
            "  [{}] {} markers, {} documents, ticks {}..{}, {}{}",
            logfile.id,
            logfile.markers,
            logfile.documents,
            logfile.tick_min,
            logfile.tick_max,
            format_size(logfile.size),
            if logfile.sealed { ", sealed" } else { "" }
        );
        if logfile.torn_bytes > 0 {
            println!("      {} torn bytes at the tail", logfile.torn_bytes);
        }
        if let Some(error) = &logfile.error {
            println!("      error: {error}");
        }
    }
}

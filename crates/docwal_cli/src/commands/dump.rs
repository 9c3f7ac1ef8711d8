//! Dump command implementation.

use super::read_logfile;
use docwal_core::{DecodedMarker, LogfileId, MarkerIterator, WalMarker};
use serde::Serialize;
use std::path::Path;

/// Marker representation for output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerInfo {
    /// Offset in the logfile.
    pub offset: u64,
    /// Encoded size.
    pub size: u32,
    /// Tick of the marker.
    pub tick: u64,
    /// Marker type name.
    pub marker_type: &'static str,
    /// Database of the marker or of the active prologue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_id: Option<u64>,
    /// Collection of the marker or of the active prologue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<u64>,
    /// Owning transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<u64>,
    /// Document key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Document body size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size: Option<usize>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    logfile: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = path.join(LogfileId::new(logfile).file_name());
    if !file.exists() {
        return Err(format!("Logfile {logfile} not found").into());
    }

    let data = read_logfile(&file)?;
    let markers = read_markers(&data, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&markers)?);
        }
        _ => {
            print_text_output(&markers);
        }
    }

    Ok(())
}

/// Decodes up to `limit` markers.
pub fn read_markers(
    data: &[u8],
    limit: Option<usize>,
) -> Result<Vec<MarkerInfo>, Box<dyn std::error::Error>> {
    let max_markers = limit.unwrap_or(usize::MAX);
    let mut context = None;
    let mut markers = Vec::new();

    for decoded in MarkerIterator::new(data).take(max_markers) {
        let decoded = decoded?;
        if let WalMarker::Prologue {
            database_id,
            collection_id,
        } = decoded.marker
        {
            context = Some((database_id.as_u64(), collection_id.as_u64()));
        }
        markers.push(describe(&decoded, context));
    }

    Ok(markers)
}

fn describe(decoded: &DecodedMarker, context: Option<(u64, u64)>) -> MarkerInfo {
    let marker = &decoded.marker;
    let (database_id, collection_id) = match marker.collection_context() {
        Some((db, cid)) => (Some(db.as_u64()), Some(cid.as_u64())),
        None => match marker {
            WalMarker::Document { .. } | WalMarker::Remove { .. } => {
                (context.map(|c| c.0), context.map(|c| c.1))
            }
            _ => (None, None),
        },
    };
    let (key, body_size) = match marker {
        WalMarker::Document { key, body, .. } => (Some(key.clone()), Some(body.len())),
        WalMarker::Remove { key, .. } => (Some(key.clone()), None),
        _ => (None, None),
    };

    MarkerInfo {
        offset: decoded.offset,
        size: decoded.size,
        tick: decoded.tick.as_u64(),
        marker_type: marker.marker_type().name(),
        database_id,
        collection_id,
        transaction_id: marker.transaction_id().map(|t| t.as_u64()),
        key,
        body_size,
    }
}

fn print_text_output(markers: &[MarkerInfo]) {
    println!(
        "{:<10} {:<8} {:<12} {:<22} {:<12} KEY",
        "OFFSET", "SIZE", "TICK", "TYPE", "CONTEXT"
    );
    println!("{}", "-".repeat(80));

    for marker in markers {
        let context = match (marker.database_id, marker.collection_id) {
            (Some(db), Some(cid)) => format!("{db}/{cid}"),
            _ => "-".to_string(),
        };
        println!(
            "{:<10} {:<8} {:<12} {:<22} {:<12} {}",
            marker.offset,
            marker.size,
            marker.tick,
            marker.marker_type,
            context,
            marker.key.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("Total: {} markers", markers.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwal_core::{CollectionId, DatabaseId, RevisionId, Tick, TransactionId};

    #[test]
    fn documents_inherit_prologue_context() {
        let mut buf = Vec::new();
        WalMarker::Prologue {
            database_id: DatabaseId::new(1),
            collection_id: CollectionId::new(10),
        }
        .encode_into(Tick::new(1), &mut buf)
        .unwrap();
        WalMarker::Document {
            transaction_id: TransactionId::new(4),
            key: "alice".into(),
            revision: RevisionId::new(2),
            body: vec![0; 12],
        }
        .encode_into(Tick::new(2), &mut buf)
        .unwrap();

        let markers = read_markers(&buf, None).unwrap();
        assert_eq!(markers.len(), 2);
        let doc = &markers[1];
        assert_eq!(doc.marker_type, "document");
        assert_eq!((doc.database_id, doc.collection_id), (Some(1), Some(10)));
        assert_eq!(doc.key.as_deref(), Some("alice"));
        assert_eq!(doc.body_size, Some(12));
        assert_eq!(doc.transaction_id, Some(4));
    }

    #[test]
    fn limit_stops_early() {
        let mut buf = Vec::new();
        for tick in 1..=5 {
            WalMarker::Padding { len: 0 }
                .encode_into(Tick::new(tick), &mut buf)
                .unwrap();
        }
        assert_eq!(read_markers(&buf, Some(2)).unwrap().len(), 2);
    }
}

//! Marker iterator over the bytes of a logfile or datafile.
//!
//! - CRC mismatches return an error immediately
//! - Truncated markers (incomplete header or payload) are treated as the end
//! - Invalid magic bytes, future versions and unknown types are corruption

use crate::error::{CoreError, CoreResult};
use crate::marker::record::{
    compute_crc32, MarkerType, WalMarker, MARKER_CRC_SIZE, MARKER_HEADER_SIZE, MARKER_MAGIC,
    MARKER_VERSION,
};
use crate::types::Tick;

/// A marker decoded from a byte buffer together with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMarker {
    /// Offset of the marker's first byte.
    pub offset: u64,
    /// Encoded size including the envelope.
    pub size: u32,
    /// Tick assigned when the marker was written.
    pub tick: Tick,
    /// The marker.
    pub marker: WalMarker,
}

impl DecodedMarker {
    /// Offset of the first byte after the marker.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

/// Decodes the marker starting at `position`.
///
/// Returns `Ok(None)` if the buffer ends before the marker does.
///
/// # Errors
///
/// Returns a corruption or checksum error for malformed markers.
pub fn decode_marker_at(data: &[u8], position: usize) -> CoreResult<Option<DecodedMarker>> {
    let remaining = data.len().saturating_sub(position);
    if remaining < MARKER_HEADER_SIZE {
        return Ok(None);
    }

    let header = &data[position..position + MARKER_HEADER_SIZE];
    if header[0..4] != MARKER_MAGIC {
        return Err(CoreError::wal_corruption(format!(
            "invalid magic at offset {position}"
        )));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version > MARKER_VERSION {
        return Err(CoreError::wal_corruption(format!(
            "unsupported version {version} at offset {position}"
        )));
    }

    let type_byte = header[6];
    let marker_type = MarkerType::from_byte(type_byte).ok_or_else(|| {
        CoreError::wal_corruption(format!(
            "unknown marker type {type_byte} at offset {position}"
        ))
    })?;

    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    let mut tick_bytes = [0u8; 8];
    tick_bytes.copy_from_slice(&header[11..19]);
    let tick = Tick::new(u64::from_le_bytes(tick_bytes));

    let total = MARKER_HEADER_SIZE + payload_len + MARKER_CRC_SIZE;
    if remaining < total {
        return Ok(None);
    }
    let size = u32::try_from(total)
        .map_err(|_| CoreError::wal_corruption(format!("oversized marker at offset {position}")))?;

    let body_end = position + MARKER_HEADER_SIZE + payload_len;
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&data[body_end..body_end + MARKER_CRC_SIZE]);
    let expected = u32::from_le_bytes(crc_bytes);
    let actual = compute_crc32(&data[position..body_end]);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }

    let payload = &data[position + MARKER_HEADER_SIZE..body_end];
    let marker = WalMarker::decode_payload(marker_type, payload)?;

    Ok(Some(DecodedMarker {
        offset: position as u64,
        size,
        tick,
        marker,
    }))
}

/// Iterates the markers of a buffer in write order.
///
/// # Example
///
/// ```rust,ignore
/// for result in MarkerIterator::new(&bytes) {
///     let decoded = result?;
///     // dispatch on decoded.marker
/// }
/// ```
#[derive(Debug)]
pub struct MarkerIterator<'a> {
    data: &'a [u8],
    position: usize,
    finished: bool,
}

impl<'a> MarkerIterator<'a> {
    /// Creates an iterator starting at the first byte.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            finished: false,
        }
    }

    /// Offset just past the last marker returned.
    ///
    /// After iteration ended without error this is the length of the valid
    /// prefix; anything beyond it is a torn tail.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.position as u64
    }
}

impl Iterator for MarkerIterator<'_> {
    type Item = CoreResult<DecodedMarker>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match decode_marker_at(self.data, self.position) {
            Ok(Some(decoded)) => {
                self.position += decoded.size as usize;
                Some(Ok(decoded))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

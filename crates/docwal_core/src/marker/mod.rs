//! Markers: the self-describing records stored in logfiles.

mod iterator;
mod record;

pub use iterator::{decode_marker_at, DecodedMarker, MarkerIterator};
pub use record::{
    compute_crc32, MarkerType, WalMarker, MARKER_CRC_SIZE, MARKER_HEADER_SIZE, MARKER_MAGIC,
    MARKER_OVERHEAD, MARKER_VERSION,
};

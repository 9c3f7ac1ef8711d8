//! Marker types and serialization.
//!
//! Every marker is framed by the same envelope:
//!
//! ```text
//! | magic "DWAL" (4) | version (2) | type (1) | payload len (4) | tick (8) | payload | crc32 (4) |
//! ```
//!
//! The CRC covers the header and the payload. All integers are little endian.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, DatabaseId, LogfileId, RevisionId, Tick, TransactionId};

/// Magic bytes identifying a marker.
pub const MARKER_MAGIC: [u8; 4] = *b"DWAL";

/// Current marker format version.
pub const MARKER_VERSION: u16 = 1;

/// Size of the envelope header in front of the payload.
pub const MARKER_HEADER_SIZE: usize = 19;

/// Size of the trailing checksum.
pub const MARKER_CRC_SIZE: usize = 4;

/// Bytes every marker carries besides its payload.
pub const MARKER_OVERHEAD: usize = MARKER_HEADER_SIZE + MARKER_CRC_SIZE;

/// Type tag of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkerType {
    /// First marker of a logfile.
    Header = 1,
    /// Last marker of a sealed logfile.
    Footer = 2,
    /// Sets the (database, collection) context for following markers.
    Prologue = 3,
    /// Filler for an abandoned slot.
    Padding = 4,
    /// Document insert or update.
    Document = 10,
    /// Document removal.
    Remove = 11,
    /// Transaction start.
    BeginTransaction = 20,
    /// Transaction commit.
    CommitTransaction = 21,
    /// Transaction abort.
    AbortTransaction = 22,
    /// Collection creation.
    CreateCollection = 30,
    /// Collection drop.
    DropCollection = 31,
    /// Collection rename.
    RenameCollection = 32,
    /// Secondary index creation.
    CreateIndex = 33,
    /// Secondary index drop.
    DropIndex = 34,
    /// Database creation.
    CreateDatabase = 40,
    /// Database drop.
    DropDatabase = 41,
    /// Attribute definition of the shape encoder.
    AttributeDefinition = 50,
    /// Shape definition of the shape encoder.
    ShapeDefinition = 51,
}

impl MarkerType {
    /// Converts a byte to a marker type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Footer),
            3 => Some(Self::Prologue),
            4 => Some(Self::Padding),
            10 => Some(Self::Document),
            11 => Some(Self::Remove),
            20 => Some(Self::BeginTransaction),
            21 => Some(Self::CommitTransaction),
            22 => Some(Self::AbortTransaction),
            30 => Some(Self::CreateCollection),
            31 => Some(Self::DropCollection),
            32 => Some(Self::RenameCollection),
            33 => Some(Self::CreateIndex),
            34 => Some(Self::DropIndex),
            40 => Some(Self::CreateDatabase),
            41 => Some(Self::DropDatabase),
            50 => Some(Self::AttributeDefinition),
            51 => Some(Self::ShapeDefinition),
            _ => None,
        }
    }

    /// Converts the marker type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns a short human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Footer => "footer",
            Self::Prologue => "prologue",
            Self::Padding => "padding",
            Self::Document => "document",
            Self::Remove => "remove",
            Self::BeginTransaction => "begin-transaction",
            Self::CommitTransaction => "commit-transaction",
            Self::AbortTransaction => "abort-transaction",
            Self::CreateCollection => "create-collection",
            Self::DropCollection => "drop-collection",
            Self::RenameCollection => "rename-collection",
            Self::CreateIndex => "create-index",
            Self::DropIndex => "drop-index",
            Self::CreateDatabase => "create-database",
            Self::DropDatabase => "drop-database",
            Self::AttributeDefinition => "attribute-definition",
            Self::ShapeDefinition => "shape-definition",
        }
    }
}

/// A WAL marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalMarker {
    /// First marker of a logfile.
    Header {
        /// Id of the logfile the header opens.
        logfile_id: LogfileId,
    },

    /// Last marker of a sealed logfile.
    Footer,

    /// Sets the (database, collection) context for document markers.
    Prologue {
        /// Database of the following markers.
        database_id: DatabaseId,
        /// Collection of the following markers.
        collection_id: CollectionId,
    },

    /// Filler written in place of an abandoned slot.
    Padding {
        /// Payload length in bytes.
        len: u32,
    },

    /// Document insert or update.
    Document {
        /// Owning transaction, zero for a standalone write.
        transaction_id: TransactionId,
        /// Primary key.
        key: String,
        /// Revision written.
        revision: RevisionId,
        /// Encoded document body.
        body: Vec<u8>,
    },

    /// Document removal.
    Remove {
        /// Owning transaction, zero for a standalone removal.
        transaction_id: TransactionId,
        /// Primary key.
        key: String,
        /// Revision of the removal.
        revision: RevisionId,
    },

    /// Transaction start.
    BeginTransaction {
        /// Database the transaction runs in.
        database_id: DatabaseId,
        /// Transaction id.
        transaction_id: TransactionId,
    },

    /// Transaction commit.
    CommitTransaction {
        /// Database the transaction runs in.
        database_id: DatabaseId,
        /// Transaction id.
        transaction_id: TransactionId,
    },

    /// Transaction abort.
    AbortTransaction {
        /// Database the transaction runs in.
        database_id: DatabaseId,
        /// Transaction id.
        transaction_id: TransactionId,
    },

    /// Collection creation.
    CreateCollection {
        /// Owning database.
        database_id: DatabaseId,
        /// New collection.
        collection_id: CollectionId,
        /// Opaque collection definition.
        definition: Vec<u8>,
    },

    /// Collection drop.
    DropCollection {
        /// Owning database.
        database_id: DatabaseId,
        /// Dropped collection.
        collection_id: CollectionId,
    },

    /// Collection rename.
    RenameCollection {
        /// Owning database.
        database_id: DatabaseId,
        /// Renamed collection.
        collection_id: CollectionId,
        /// New name.
        name: String,
    },

    /// Secondary index creation.
    CreateIndex {
        /// Owning database.
        database_id: DatabaseId,
        /// Indexed collection.
        collection_id: CollectionId,
        /// Index id.
        index_id: u64,
        /// Opaque index definition.
        definition: Vec<u8>,
    },

    /// Secondary index drop.
    DropIndex {
        /// Owning database.
        database_id: DatabaseId,
        /// Indexed collection.
        collection_id: CollectionId,
        /// Index id.
        index_id: u64,
    },

    /// Database creation.
    CreateDatabase {
        /// New database.
        database_id: DatabaseId,
        /// Database name.
        name: String,
    },

    /// Database drop.
    DropDatabase {
        /// Dropped database.
        database_id: DatabaseId,
    },

    /// Attribute definition of the shape encoder, carried as opaque data.
    AttributeDefinition {
        /// Owning database.
        database_id: DatabaseId,
        /// Owning collection.
        collection_id: CollectionId,
        /// Attribute id.
        attribute_id: u64,
        /// Attribute name.
        name: String,
    },

    /// Shape definition of the shape encoder, carried as opaque data.
    ShapeDefinition {
        /// Owning database.
        database_id: DatabaseId,
        /// Owning collection.
        collection_id: CollectionId,
        /// Shape id.
        shape_id: u64,
        /// Encoded shape.
        shape: Vec<u8>,
    },
}

impl WalMarker {
    /// Returns the marker type.
    #[must_use]
    pub fn marker_type(&self) -> MarkerType {
        match self {
            Self::Header { .. } => MarkerType::Header,
            Self::Footer => MarkerType::Footer,
            Self::Prologue { .. } => MarkerType::Prologue,
            Self::Padding { .. } => MarkerType::Padding,
            Self::Document { .. } => MarkerType::Document,
            Self::Remove { .. } => MarkerType::Remove,
            Self::BeginTransaction { .. } => MarkerType::BeginTransaction,
            Self::CommitTransaction { .. } => MarkerType::CommitTransaction,
            Self::AbortTransaction { .. } => MarkerType::AbortTransaction,
            Self::CreateCollection { .. } => MarkerType::CreateCollection,
            Self::DropCollection { .. } => MarkerType::DropCollection,
            Self::RenameCollection { .. } => MarkerType::RenameCollection,
            Self::CreateIndex { .. } => MarkerType::CreateIndex,
            Self::DropIndex { .. } => MarkerType::DropIndex,
            Self::CreateDatabase { .. } => MarkerType::CreateDatabase,
            Self::DropDatabase { .. } => MarkerType::DropDatabase,
            Self::AttributeDefinition { .. } => MarkerType::AttributeDefinition,
            Self::ShapeDefinition { .. } => MarkerType::ShapeDefinition,
        }
    }

    /// Returns the transaction the marker belongs to, if any.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::Document { transaction_id, .. }
            | Self::Remove { transaction_id, .. }
            | Self::BeginTransaction { transaction_id, .. }
            | Self::CommitTransaction { transaction_id, .. }
            | Self::AbortTransaction { transaction_id, .. } => {
                Some(*transaction_id).filter(|id| id.is_some())
            }
            _ => None,
        }
    }

    /// Returns the collection a structural marker names itself.
    ///
    /// Document and remove markers return `None`: their collection comes
    /// from the preceding prologue.
    #[must_use]
    pub fn collection_context(&self) -> Option<(DatabaseId, CollectionId)> {
        match self {
            Self::Prologue {
                database_id,
                collection_id,
            }
            | Self::CreateCollection {
                database_id,
                collection_id,
                ..
            }
            | Self::DropCollection {
                database_id,
                collection_id,
            }
            | Self::RenameCollection {
                database_id,
                collection_id,
                ..
            }
            | Self::CreateIndex {
                database_id,
                collection_id,
                ..
            }
            | Self::DropIndex {
                database_id,
                collection_id,
                ..
            }
            | Self::AttributeDefinition {
                database_id,
                collection_id,
                ..
            }
            | Self::ShapeDefinition {
                database_id,
                collection_id,
                ..
            } => Some((*database_id, *collection_id)),
            _ => None,
        }
    }

    /// Returns true for markers that change collection metadata rather than documents.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CreateCollection { .. }
                | Self::RenameCollection { .. }
                | Self::CreateIndex { .. }
                | Self::DropIndex { .. }
                | Self::AttributeDefinition { .. }
                | Self::ShapeDefinition { .. }
        )
    }

    /// Returns the encoded payload length.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        const ID: usize = 8;
        const LEN: usize = 4;
        match self {
            Self::Header { .. } => ID,
            Self::Footer => 0,
            Self::Padding { len } => *len as usize,
            Self::Prologue { .. }
            | Self::BeginTransaction { .. }
            | Self::CommitTransaction { .. }
            | Self::AbortTransaction { .. }
            | Self::DropCollection { .. } => 2 * ID,
            Self::Document { key, body, .. } => ID + LEN + key.len() + ID + LEN + body.len(),
            Self::Remove { key, .. } => ID + LEN + key.len() + ID,
            Self::CreateCollection { definition, .. } => 2 * ID + LEN + definition.len(),
            Self::RenameCollection { name, .. } => 2 * ID + LEN + name.len(),
            Self::CreateIndex { definition, .. } => 3 * ID + LEN + definition.len(),
            Self::DropIndex { .. } => 3 * ID,
            Self::CreateDatabase { name, .. } => ID + LEN + name.len(),
            Self::DropDatabase { .. } => ID,
            Self::AttributeDefinition { name, .. } => 3 * ID + LEN + name.len(),
            Self::ShapeDefinition { shape, .. } => 3 * ID + LEN + shape.len(),
        }
    }

    /// Returns the size of the marker including its envelope.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MARKER_OVERHEAD + self.payload_len()
    }

    /// Creates a padding marker that occupies exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is smaller than the envelope.
    pub fn padding(size: usize) -> CoreResult<Self> {
        let len = size
            .checked_sub(MARKER_OVERHEAD)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or_else(|| CoreError::internal(format!("cannot pad {size} bytes")))?;
        Ok(Self::Padding { len })
    }

    /// Serializes the marker with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit the 4-byte length field.
    pub fn encode(&self, tick: Tick) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(tick, &mut buf)?;
        Ok(buf)
    }

    /// Appends the marker with its envelope to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit the 4-byte length field.
    pub fn encode_into(&self, tick: Tick, buf: &mut Vec<u8>) -> CoreResult<()> {
        let payload_len = u32::try_from(self.payload_len()).map_err(|_| {
            CoreError::DocumentTooLarge {
                size: self.encoded_len() as u64,
                max: u64::from(u32::MAX),
            }
        })?;

        let start = buf.len();
        buf.extend_from_slice(&MARKER_MAGIC);
        buf.extend_from_slice(&MARKER_VERSION.to_le_bytes());
        buf.push(self.marker_type().as_byte());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&tick.as_u64().to_le_bytes());
        self.encode_payload(buf);
        let crc = compute_crc32(&buf[start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        fn put_u64(buf: &mut Vec<u8>, value: u64) {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        // lengths were bounded by the u32 check in encode_into
        fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(bytes);
        }

        match self {
            Self::Header { logfile_id } => put_u64(buf, logfile_id.as_u64()),
            Self::Footer => {}
            Self::Padding { len } => buf.resize(buf.len() + *len as usize, 0),
            Self::Prologue {
                database_id,
                collection_id,
            }
            | Self::DropCollection {
                database_id,
                collection_id,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
            }
            Self::BeginTransaction {
                database_id,
                transaction_id,
            }
            | Self::CommitTransaction {
                database_id,
                transaction_id,
            }
            | Self::AbortTransaction {
                database_id,
                transaction_id,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, transaction_id.as_u64());
            }
            Self::Document {
                transaction_id,
                key,
                revision,
                body,
            } => {
                put_u64(buf, transaction_id.as_u64());
                put_bytes(buf, key.as_bytes());
                put_u64(buf, revision.as_u64());
                put_bytes(buf, body);
            }
            Self::Remove {
                transaction_id,
                key,
                revision,
            } => {
                put_u64(buf, transaction_id.as_u64());
                put_bytes(buf, key.as_bytes());
                put_u64(buf, revision.as_u64());
            }
            Self::CreateCollection {
                database_id,
                collection_id,
                definition,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
                put_bytes(buf, definition);
            }
            Self::RenameCollection {
                database_id,
                collection_id,
                name,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
                put_bytes(buf, name.as_bytes());
            }
            Self::CreateIndex {
                database_id,
                collection_id,
                index_id,
                definition,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
                put_u64(buf, *index_id);
                put_bytes(buf, definition);
            }
            Self::DropIndex {
                database_id,
                collection_id,
                index_id,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
                put_u64(buf, *index_id);
            }
            Self::CreateDatabase { database_id, name } => {
                put_u64(buf, database_id.as_u64());
                put_bytes(buf, name.as_bytes());
            }
            Self::DropDatabase { database_id } => put_u64(buf, database_id.as_u64()),
            Self::AttributeDefinition {
                database_id,
                collection_id,
                attribute_id,
                name,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
                put_u64(buf, *attribute_id);
                put_bytes(buf, name.as_bytes());
            }
            Self::ShapeDefinition {
                database_id,
                collection_id,
                shape_id,
                shape,
            } => {
                put_u64(buf, database_id.as_u64());
                put_u64(buf, collection_id.as_u64());
                put_u64(buf, *shape_id);
                put_bytes(buf, shape);
            }
        }
    }

    /// Deserializes a marker from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns a corruption error on short payloads, invalid UTF-8 or
    /// trailing bytes.
    pub fn decode_payload(marker_type: MarkerType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);

        let marker = match marker_type {
            MarkerType::Header => Self::Header {
                logfile_id: LogfileId::new(reader.read_u64()?),
            },
            MarkerType::Footer => Self::Footer,
            MarkerType::Padding => {
                reader.skip_rest();
                Self::Padding {
                    len: u32::try_from(payload.len())
                        .map_err(|_| CoreError::wal_corruption("padding too large"))?,
                }
            }
            MarkerType::Prologue => Self::Prologue {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
            },
            MarkerType::Document => Self::Document {
                transaction_id: TransactionId::new(reader.read_u64()?),
                key: reader.read_string()?,
                revision: RevisionId::new(reader.read_u64()?),
                body: reader.read_bytes()?.to_vec(),
            },
            MarkerType::Remove => Self::Remove {
                transaction_id: TransactionId::new(reader.read_u64()?),
                key: reader.read_string()?,
                revision: RevisionId::new(reader.read_u64()?),
            },
            MarkerType::BeginTransaction => Self::BeginTransaction {
                database_id: DatabaseId::new(reader.read_u64()?),
                transaction_id: TransactionId::new(reader.read_u64()?),
            },
            MarkerType::CommitTransaction => Self::CommitTransaction {
                database_id: DatabaseId::new(reader.read_u64()?),
                transaction_id: TransactionId::new(reader.read_u64()?),
            },
            MarkerType::AbortTransaction => Self::AbortTransaction {
                database_id: DatabaseId::new(reader.read_u64()?),
                transaction_id: TransactionId::new(reader.read_u64()?),
            },
            MarkerType::CreateCollection => Self::CreateCollection {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
                definition: reader.read_bytes()?.to_vec(),
            },
            MarkerType::DropCollection => Self::DropCollection {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
            },
            MarkerType::RenameCollection => Self::RenameCollection {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
                name: reader.read_string()?,
            },
            MarkerType::CreateIndex => Self::CreateIndex {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
                index_id: reader.read_u64()?,
                definition: reader.read_bytes()?.to_vec(),
            },
            MarkerType::DropIndex => Self::DropIndex {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
                index_id: reader.read_u64()?,
            },
            MarkerType::CreateDatabase => Self::CreateDatabase {
                database_id: DatabaseId::new(reader.read_u64()?),
                name: reader.read_string()?,
            },
            MarkerType::DropDatabase => Self::DropDatabase {
                database_id: DatabaseId::new(reader.read_u64()?),
            },
            MarkerType::AttributeDefinition => Self::AttributeDefinition {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
                attribute_id: reader.read_u64()?,
                name: reader.read_string()?,
            },
            MarkerType::ShapeDefinition => Self::ShapeDefinition {
                database_id: DatabaseId::new(reader.read_u64()?),
                collection_id: CollectionId::new(reader.read_u64()?),
                shape_id: reader.read_u64()?,
                shape: reader.read_bytes()?.to_vec(),
            },
        };

        reader.finish(marker_type)?;
        Ok(marker)
    }
}

/// Cursor over a marker payload.
struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, cursor: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
        let bytes = &self.payload[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn read_u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::wal_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> CoreResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::wal_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_bytes(&mut self) -> CoreResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    fn read_string(&mut self) -> CoreResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::wal_corruption("string is not valid UTF-8"))
    }

    fn skip_rest(&mut self) {
        self.cursor = self.payload.len();
    }

    fn finish(&self, marker_type: MarkerType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(CoreError::wal_corruption(format!(
                "trailing bytes in {} marker: expected {} bytes, got {}",
                marker_type.name(),
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_markers() -> Vec<WalMarker> {
        vec![
            WalMarker::Header {
                logfile_id: LogfileId::new(3),
            },
            WalMarker::Footer,
            WalMarker::Prologue {
                database_id: DatabaseId::new(1),
                collection_id: CollectionId::new(2),
            },
            WalMarker::Document {
                transaction_id: TransactionId::new(9),
                key: "alice".to_string(),
                revision: RevisionId::new(100),
                body: b"{\"age\":30}".to_vec(),
            },
            WalMarker::Remove {
                transaction_id: TransactionId::default(),
                key: "bob".to_string(),
                revision: RevisionId::new(101),
            },
            WalMarker::CreateIndex {
                database_id: DatabaseId::new(1),
                collection_id: CollectionId::new(2),
                index_id: 7,
                definition: b"hash:name".to_vec(),
            },
            WalMarker::ShapeDefinition {
                database_id: DatabaseId::new(1),
                collection_id: CollectionId::new(2),
                shape_id: 12,
                shape: vec![1, 2, 3],
            },
        ]
    }

    #[test]
    fn marker_type_from_byte_rejects_unknown() {
        assert_eq!(MarkerType::from_byte(10), Some(MarkerType::Document));
        assert_eq!(MarkerType::from_byte(0), None);
        assert_eq!(MarkerType::from_byte(99), None);
    }

    #[test]
    fn payload_len_matches_encoding() {
        for marker in sample_markers() {
            let bytes = marker.encode(Tick::new(1)).unwrap();
            assert_eq!(bytes.len(), marker.encoded_len(), "{marker:?}");
        }
    }

    #[test]
    fn decode_payload_inverts_encode() {
        for marker in sample_markers() {
            let bytes = marker.encode(Tick::new(5)).unwrap();
            let payload = &bytes[MARKER_HEADER_SIZE..bytes.len() - MARKER_CRC_SIZE];
            let decoded = WalMarker::decode_payload(marker.marker_type(), payload).unwrap();
            assert_eq!(decoded, marker);
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = 7u64.to_le_bytes().to_vec();
        payload.push(0);
        let result = WalMarker::decode_payload(MarkerType::Header, &payload);
        assert!(matches!(result, Err(CoreError::WalCorruption { .. })));
    }

    #[test]
    fn padding_fills_exact_size() {
        let padding = WalMarker::padding(64).unwrap();
        assert_eq!(padding.encoded_len(), 64);
        assert!(WalMarker::padding(MARKER_OVERHEAD - 1).is_err());
    }

    #[test]
    fn transaction_id_ignores_zero() {
        let standalone = WalMarker::Remove {
            transaction_id: TransactionId::default(),
            key: "k".into(),
            revision: RevisionId::new(1),
        };
        assert_eq!(standalone.transaction_id(), None);
        assert_eq!(
            sample_markers()[3].transaction_id(),
            Some(TransactionId::new(9))
        );
    }

    #[test]
    fn crc32_known_value() {
        // "123456789" is the standard check input
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }
}

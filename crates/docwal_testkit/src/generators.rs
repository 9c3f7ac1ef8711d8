//! Property-based test generators using proptest.
//!
//! Provides strategies for markers and for write workloads against the
//! test collection.

use docwal_core::{
    CollectionId, DatabaseId, LogfileId, RevisionId, TransactionId, WalMarker,
};
use proptest::prelude::*;

/// One step of a generated workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace a document.
    Put {
        /// Document key.
        key: String,
        /// Document body.
        body: Vec<u8>,
    },
    /// Remove a document.
    Remove {
        /// Document key.
        key: String,
    },
}

impl WriteOp {
    /// Key the operation touches.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Strategy for document keys drawn from a small alphabet, so workloads
/// overwrite keys often.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f]{1,3}").expect("Invalid regex")
}

/// Strategy for document bodies.
pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for a single workload step. Puts are three times as likely as
/// removes.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => (key_strategy(), body_strategy()).prop_map(|(key, body)| WriteOp::Put { key, body }),
        1 => key_strategy().prop_map(|key| WriteOp::Remove { key }),
    ]
}

/// Strategy for a workload of up to `max_len` steps.
pub fn workload_strategy(max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), 1..max_len)
}

fn id() -> impl Strategy<Value = u64> {
    1u64..1_000
}

/// Strategy for markers of every type.
pub fn marker_strategy() -> impl Strategy<Value = WalMarker> {
    prop_oneof![
        id().prop_map(|id| WalMarker::Header {
            logfile_id: LogfileId::new(id),
        }),
        Just(WalMarker::Footer),
        (id(), id()).prop_map(|(db, cid)| WalMarker::Prologue {
            database_id: DatabaseId::new(db),
            collection_id: CollectionId::new(cid),
        }),
        (0u32..64).prop_map(|len| WalMarker::Padding { len }),
        (0u64..8, key_strategy(), id(), body_strategy()).prop_map(|(tid, key, rev, body)| {
            WalMarker::Document {
                transaction_id: TransactionId::new(tid),
                key,
                revision: RevisionId::new(rev),
                body,
            }
        }),
        (0u64..8, key_strategy(), id()).prop_map(|(tid, key, rev)| WalMarker::Remove {
            transaction_id: TransactionId::new(tid),
            key,
            revision: RevisionId::new(rev),
        }),
        (id(), id()).prop_map(|(db, tid)| WalMarker::BeginTransaction {
            database_id: DatabaseId::new(db),
            transaction_id: TransactionId::new(tid),
        }),
        (id(), id()).prop_map(|(db, tid)| WalMarker::CommitTransaction {
            database_id: DatabaseId::new(db),
            transaction_id: TransactionId::new(tid),
        }),
        (id(), id()).prop_map(|(db, tid)| WalMarker::AbortTransaction {
            database_id: DatabaseId::new(db),
            transaction_id: TransactionId::new(tid),
        }),
        (id(), id(), body_strategy()).prop_map(|(db, cid, definition)| {
            WalMarker::CreateCollection {
                database_id: DatabaseId::new(db),
                collection_id: CollectionId::new(cid),
                definition,
            }
        }),
        (id(), id()).prop_map(|(db, cid)| WalMarker::DropCollection {
            database_id: DatabaseId::new(db),
            collection_id: CollectionId::new(cid),
        }),
        (id(), "[a-z]{1,12}").prop_map(|(db, name)| WalMarker::CreateDatabase {
            database_id: DatabaseId::new(db),
            name,
        }),
        id().prop_map(|db| WalMarker::DropDatabase {
            database_id: DatabaseId::new(db),
        }),
    ]
}

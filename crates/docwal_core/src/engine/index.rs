//! Primary index and marker location handles.
//!
//! Index entries never hold references into logfile or datafile memory.
//! They store a [`MarkerLocation`], a plain value naming the file, the byte
//! offset and a generation that compaction bumps whenever it moves a
//! marker. The collector compares locations by value to decide whether an
//! entry still refers to the marker it just transferred.

use crate::types::{DatafileId, LogfileId, RevisionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// File a marker lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum LocationKind {
    /// A WAL logfile.
    Wal(LogfileId),
    /// A collection datafile.
    Datafile(DatafileId),
}

/// Value handle for a marker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MarkerLocation {
    /// File holding the marker.
    pub kind: LocationKind,
    /// Byte offset of the marker.
    pub offset: u64,
    /// Relocation generation of the file contents.
    pub generation: u32,
}

impl MarkerLocation {
    /// Location of a marker inside a logfile.
    #[must_use]
    pub const fn wal(logfile: LogfileId, offset: u64) -> Self {
        Self {
            kind: LocationKind::Wal(logfile),
            offset,
            generation: 0,
        }
    }

    /// Location of a marker inside a datafile.
    #[must_use]
    pub const fn datafile(datafile: DatafileId, offset: u64, generation: u32) -> Self {
        Self {
            kind: LocationKind::Datafile(datafile),
            offset,
            generation,
        }
    }

    /// Returns true if the marker still lives in the WAL.
    #[must_use]
    pub const fn is_wal(&self) -> bool {
        matches!(self.kind, LocationKind::Wal(_))
    }
}

/// Live index entry of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Revision the entry refers to.
    pub revision: RevisionId,
    /// Where the marker of that revision lives.
    pub location: MarkerLocation,
    /// Encoded size of that marker.
    pub size: u32,
}

/// Primary-key index of a collection.
#[derive(Debug, Default)]
pub struct PrimaryIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl PrimaryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the entry of `key`.
    pub fn lookup(&self, key: &str) -> Option<IndexEntry> {
        self.entries.read().get(key).copied()
    }

    /// Inserts or replaces the entry of `key`, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.write().insert(key.into(), entry)
    }

    /// Removes the entry of `key`.
    pub fn remove(&self, key: &str) -> Option<IndexEntry> {
        self.entries.write().remove(key)
    }

    /// Repoints `key` at `new_location` if its entry still has `revision`
    /// and `expected` location. Returns whether the entry was updated.
    pub fn relocate_if(
        &self,
        key: &str,
        revision: RevisionId,
        expected: MarkerLocation,
        new_location: MarkerLocation,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.revision == revision && entry.location == expected => {
                entry.location = new_location;
                true
            }
            _ => false,
        }
    }

    /// Applies `relocate` to every entry, replacing locations it returns.
    ///
    /// Returns the number of relocated entries.
    pub fn relocate_all<F>(&self, mut relocate: F) -> usize
    where
        F: FnMut(&str, &IndexEntry) -> Option<MarkerLocation>,
    {
        let mut moved = 0;
        for (key, entry) in self.entries.write().iter_mut() {
            if let Some(location) = relocate(key, entry) {
                entry.location = location;
                moved += 1;
            }
        }
        moved
    }

    /// Returns the number of indexed documents.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(revision: u64, location: MarkerLocation) -> IndexEntry {
        IndexEntry {
            revision: RevisionId::new(revision),
            location,
            size: 64,
        }
    }

    #[test]
    fn relocate_if_requires_same_revision_and_location() {
        let index = PrimaryIndex::new();
        let wal = MarkerLocation::wal(LogfileId::new(5), 128);
        let datafile = MarkerLocation::datafile(DatafileId::new(1), 0, 0);
        index.insert("k", entry(10, wal));

        assert!(!index.relocate_if("k", RevisionId::new(9), wal, datafile));
        assert!(!index.relocate_if(
            "k",
            RevisionId::new(10),
            MarkerLocation::wal(LogfileId::new(5), 64),
            datafile
        ));
        assert!(index.relocate_if("k", RevisionId::new(10), wal, datafile));
        assert_eq!(index.lookup("k").unwrap().location, datafile);
        assert!(!index.relocate_if("missing", RevisionId::new(10), wal, datafile));
    }

    #[test]
    fn generation_distinguishes_locations() {
        let a = MarkerLocation::datafile(DatafileId::new(1), 0, 0);
        let b = MarkerLocation::datafile(DatafileId::new(1), 0, 1);
        assert_ne!(a, b);
        assert!(!a.is_wal());
    }

    #[test]
    fn relocate_all_counts_moves() {
        let index = PrimaryIndex::new();
        index.insert("a", entry(1, MarkerLocation::wal(LogfileId::new(1), 0)));
        index.insert(
            "b",
            entry(2, MarkerLocation::datafile(DatafileId::new(1), 0, 0)),
        );

        let moved = index.relocate_all(|_, e| {
            (!e.location.is_wal()).then(|| MarkerLocation::datafile(DatafileId::new(2), 0, 1))
        });
        assert_eq!(moved, 1);
        assert!(index.lookup("a").unwrap().location.is_wal());
        assert_eq!(index.len(), 2);
    }
}

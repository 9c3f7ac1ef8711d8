//! Core type definitions for docwal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Server-wide logical timestamp.
    ///
    /// Ticks are strictly increasing in write order and never reused.
    Tick,
    "tick"
);

id_type!(
    /// Identifier of a logfile. Logfile ids are drawn from the tick clock.
    LogfileId,
    "logfile"
);

id_type!(
    /// Identifier of a transaction. Zero means "no transaction".
    TransactionId,
    "txn"
);

id_type!(
    /// Identifier of a database.
    DatabaseId,
    "db"
);

id_type!(
    /// Identifier of a collection.
    CollectionId,
    "col"
);

id_type!(
    /// Identifier of a collection datafile owned by the storage engine.
    DatafileId,
    "df"
);

id_type!(
    /// Identifier of a logfile barrier.
    BarrierId,
    "barrier"
);

id_type!(
    /// Document revision.
    RevisionId,
    "rev"
);

impl Tick {
    /// The tick before any marker was written.
    pub const ZERO: Self = Self(0);

    /// Returns the next tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl TransactionId {
    /// Returns true if the marker belongs to an explicit transaction.
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl LogfileId {
    /// Returns the file name of the logfile inside the WAL directory.
    #[must_use]
    pub fn file_name(self) -> String {
        format!("logfile-{}.db", self.0)
    }

    /// Parses a logfile file name produced by [`LogfileId::file_name`].
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let id = name.strip_prefix("logfile-")?.strip_suffix(".db")?;
        id.parse().ok().filter(|id| *id != 0).map(Self)
    }
}

/// Process-owned tick generator.
///
/// One clock is shared by the slot allocator (marker ticks) and the
/// allocator thread (logfile ids).
#[derive(Debug, Default)]
pub struct TickClock {
    current: AtomicU64,
}

impl TickClock {
    /// Creates a clock whose next tick is `start + 1`.
    #[must_use]
    pub fn new(start: Tick) -> Self {
        Self {
            current: AtomicU64::new(start.0),
        }
    }

    /// Hands out the next tick.
    pub fn next(&self) -> Tick {
        Tick(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns the last tick handed out.
    #[must_use]
    pub fn current(&self) -> Tick {
        Tick(self.current.load(Ordering::SeqCst))
    }

    /// Moves the clock forward to at least `seen`. Never moves it backwards.
    pub fn update(&self, seen: Tick) {
        self.current.fetch_max(seen.0, Ordering::SeqCst);
    }
}

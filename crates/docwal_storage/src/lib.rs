//! # docwal storage
//!
//! Append-only byte stores for docwal logfiles and collection datafiles.
//!
//! A backend never looks inside the bytes it stores. Marker framing,
//! checksums and logfile layout belong to `docwal_core`.
//!
//! - [`FileBackend`] keeps a logfile in a regular file and can be opened
//!   read-only by inspection tools
//! - [`InMemoryBackend`] keeps bytes in memory, optionally with a size limit
//!   that behaves like a full filesystem
//!
//! ```rust
//! use docwal_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset + 6, 5).unwrap(), b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

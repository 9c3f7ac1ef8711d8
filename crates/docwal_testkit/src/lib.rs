//! # docwal testkit
//!
//! Test utilities for docwal.
//!
//! This crate provides:
//! - WAL fixtures backed by a temporary directory and the in-memory engine
//! - Property-based test generators using proptest
//! - Cross-module integration scenarios
//! - Stress testing utilities for concurrent writers
//! - Crash simulation on copied WAL directories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docwal_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_wal() {
//!     with_temp_wal(|wal| {
//!         wal.write_document("alice", b"{}");
//!         wal.flush_and_collect();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;

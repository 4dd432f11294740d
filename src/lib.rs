//! Column store with in-place logical deletes and updates over compressed
//! pages.
//!
//! Leaf pages keep their repeat-count compressed image immutable; records
//! are modified through a per-page overlay published by a single writer and
//! read without locks. See [`storage::ColumnTree`].

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::alloc::{AccountingAlloc, AllocStats, Candidate, OverlayAlloc};
pub use storage::{Applied, ColumnOptions, ColumnTree};
pub use types::{ColStoreError, ErrorKind, Result};

#![forbid(unsafe_code)]

//! Shared identifiers and the crate-wide error type.

use std::fmt;

pub mod checksum;

pub use checksum::image_crc32;

/// Logical record number within a column store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecNo(pub u64);

/// Position of a page within its tree's page directory.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

impl fmt::Display for RecNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecNo {
    fn from(value: u64) -> Self {
        RecNo(value)
    }
}

/// Errors surfaced by column store operations.
#[derive(thiserror::Error, Debug)]
pub enum ColStoreError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the store cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The record number does not resolve to any page.
    #[error("record {recno} not found")]
    NotFound {
        /// Record number that failed to resolve.
        recno: u64,
    },
    /// An overlay allocation could not be satisfied.
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory {
        /// Size of the allocation that failed.
        bytes: usize,
    },
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
}

/// Coarse classification of a [`ColStoreError`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Record did not resolve.
    NotFound,
    /// Allocation failed.
    OutOfMemory,
    /// I/O failed.
    Io,
    /// Anything else: corruption, invalid input, bad configuration.
    Other,
}

impl ColStoreError {
    /// Returns the coarse kind callers branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ColStoreError::NotFound { .. } => ErrorKind::NotFound,
            ColStoreError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            ColStoreError::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Other,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ColStoreError>;

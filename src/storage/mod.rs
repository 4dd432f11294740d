//! Column storage engine.
//!
//! Implements compressed column-store leaf pages and the overlay through
//! which individual records are deleted or replaced in place.

/// Column-store pages, overlay and mutation paths.
pub mod column;

mod options;

/// Configuration for opening a column tree.
pub use options::ColumnOptions;

pub use column::{Applied, ColPage, ColumnStats, ColumnStatsSnapshot, ColumnTree};

//! Column-store leaf pages and their in-memory modification overlay.
//!
//! Pages keep their compressed image untouched. Deletes and updates are
//! recorded as overlay nodes: per-slot replacement chains on uncompressed
//! pages, per-run expansion entries on repeat-count compressed pages. All
//! overlay mutation goes through the page serializer; reads are lock-free.

/// Column file persistence of page images.
pub mod file;
/// Compressed page image format.
pub mod image;
mod modify;
/// Overlay node types.
pub mod overlay;
mod page;
/// Per-page single-writer dispatch.
pub mod serial;
mod stats;
mod tree;

pub use file::{read_column_file, write_column_file};
pub use image::{ImageBuilder, ImageKind, Location};
pub use overlay::{Expansion, ReplValue, Replacement, SlotArray};
pub use page::ColPage;
pub use serial::{Applied, PageSerializer};
pub use stats::{ColumnStats, ColumnStatsSnapshot};
pub use tree::{ColumnTree, PagePin, SearchHit};

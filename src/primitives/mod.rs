//! Low-level primitives for building the storage engine.

/// Fallible, accounted allocation for overlay structures.
///
/// Allocation interface consumed by the overlay, plus the ownership-transfer
/// type for speculative allocations.
pub mod alloc;

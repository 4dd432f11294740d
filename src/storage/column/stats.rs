use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of column tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct ColumnStatsSnapshot {
    /// Record searches performed
    pub searches: u64,
    /// Searches that did not resolve to a record
    pub not_found: u64,
    /// Generations pushed onto an uncompressed slot
    pub replacements_installed: u64,
    /// Expansion entries published
    pub expansions_installed: u64,
    /// Generations pushed onto an existing expansion entry
    pub expansion_appends: u64,
    /// Expansions that found their offset already expanded by a racing writer
    pub stale_expansions_merged: u64,
    /// Overlay arrays installed on a page
    pub arrays_adopted: u64,
    /// Speculative overlay arrays freed after losing adoption
    pub arrays_discarded: u64,
    /// Modifications abandoned because an allocation failed
    pub alloc_failures: u64,
}

/// Thread-safe statistics tracking for column tree operations.
#[derive(Default, Debug)]
pub struct ColumnStats {
    searches: AtomicU64,
    not_found: AtomicU64,
    replacements_installed: AtomicU64,
    expansions_installed: AtomicU64,
    expansion_appends: AtomicU64,
    stale_expansions_merged: AtomicU64,
    arrays_adopted: AtomicU64,
    arrays_discarded: AtomicU64,
    alloc_failures: AtomicU64,
}

impl ColumnStats {
    /// Returns the number of record searches.
    pub fn searches(&self) -> u64 {
        self.searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of overlay arrays installed.
    pub fn arrays_adopted(&self) -> u64 {
        self.arrays_adopted.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of speculative arrays discarded.
    pub fn arrays_discarded(&self) -> u64 {
        self.arrays_discarded.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_searches(&self) {
        self.searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_not_found(&self) {
        self.not_found.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_replacements_installed(&self) {
        self.replacements_installed
            .fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_expansions_installed(&self) {
        self.expansions_installed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_expansion_appends(&self) {
        self.expansion_appends.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_stale_expansions_merged(&self) {
        self.stale_expansions_merged
            .fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_arrays_adopted(&self) {
        self.arrays_adopted.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_arrays_discarded(&self) {
        self.arrays_discarded.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_alloc_failures(&self) {
        self.alloc_failures.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Capture all counters.
    pub fn snapshot(&self) -> ColumnStatsSnapshot {
        ColumnStatsSnapshot {
            searches: self.searches.load(AtomicOrdering::Relaxed),
            not_found: self.not_found.load(AtomicOrdering::Relaxed),
            replacements_installed: self.replacements_installed.load(AtomicOrdering::Relaxed),
            expansions_installed: self.expansions_installed.load(AtomicOrdering::Relaxed),
            expansion_appends: self.expansion_appends.load(AtomicOrdering::Relaxed),
            stale_expansions_merged: self.stale_expansions_merged.load(AtomicOrdering::Relaxed),
            arrays_adopted: self.arrays_adopted.load(AtomicOrdering::Relaxed),
            arrays_discarded: self.arrays_discarded.load(AtomicOrdering::Relaxed),
            alloc_failures: self.alloc_failures.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snap = self.snapshot();
        tracing::info!(
            target: "colstore::stats",
            searches = snap.searches,
            not_found = snap.not_found,
            replacements_installed = snap.replacements_installed,
            expansions_installed = snap.expansions_installed,
            expansion_appends = snap.expansion_appends,
            stale_expansions_merged = snap.stale_expansions_merged,
            arrays_adopted = snap.arrays_adopted,
            arrays_discarded = snap.arrays_discarded,
            alloc_failures = snap.alloc_failures,
            "column stats snapshot"
        );
    }
}

//! Page serializer: the only code allowed to mutate a page's published
//! overlay.
//!
//! `PageSerializer::submit` runs one `SerialOp` at a time per page while
//! holding that page's write gate; operations on different pages proceed in
//! parallel. Readers never take the gate. Candidates passed in are either
//! adopted by the page or handed back in `Leftovers` for the caller to
//! dispose of.

use std::ptr;
use std::sync::atomic::AtomicPtr;

use parking_lot::MutexGuard;

use super::overlay::{self, Expansion, Replacement, SlotArray};
use super::page::ColPage;
use crate::primitives::alloc::Candidate;
use crate::types::{ColStoreError, Result};

/// A modification waiting for its page's write gate.
#[derive(Debug)]
pub(crate) enum SerialOp<'t> {
    /// Uncompressed page: push a new generation onto `replacement[slot]`.
    InstallReplacement {
        /// Slot of the record.
        slot: usize,
        /// Array to adopt if the page still has none.
        array: Option<Candidate<SlotArray<Replacement>>>,
        /// New generation.
        repl: Candidate<Replacement>,
    },
    /// Compressed page: distinguish a record out of the run at `slot`.
    InstallExpansion {
        /// Run index.
        slot: usize,
        /// Array to adopt if the page still has none.
        array: Option<Candidate<SlotArray<Expansion>>>,
        /// Entry for the record; its offset is already set.
        exp: Candidate<Expansion>,
        /// First generation for the entry.
        repl: Candidate<Replacement>,
    },
    /// Compressed page: push a new generation onto an existing entry.
    AppendReplacement {
        /// Run index the entry hangs off.
        slot: usize,
        /// Entry found by search on the submitted page.
        exp: &'t Expansion,
        /// New generation.
        repl: Candidate<Replacement>,
    },
}

/// How an operation landed on the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Applied {
    /// A generation was pushed onto `replacement[slot]`.
    Replacement,
    /// A new expansion entry was published.
    Expansion,
    /// A generation was pushed onto an existing expansion entry.
    AppendedToExpansion,
    /// An entry for the offset appeared after search; the generation was
    /// pushed onto it and the caller's entry returned unused.
    MergedIntoExisting,
}

/// Candidates the serializer did not adopt.
#[must_use = "leftover candidates must be disposed of by the caller"]
#[derive(Debug, Default)]
pub(crate) struct Leftovers {
    /// Replacement array that lost the adoption race.
    pub(crate) repl_array: Option<Candidate<SlotArray<Replacement>>>,
    /// Expansion array that lost the adoption race.
    pub(crate) exp_array: Option<Candidate<SlotArray<Expansion>>>,
    /// Expansion entry superseded by one published concurrently.
    pub(crate) expansion: Option<Candidate<Expansion>>,
}

/// Result of one serialized operation.
#[derive(Debug)]
pub(crate) struct SerialOutcome {
    /// Path taken.
    pub(crate) applied: Applied,
    /// Whether this operation installed the page's overlay array.
    pub(crate) array_adopted: bool,
    /// Candidates handed back.
    pub(crate) leftovers: Leftovers,
}

/// Exclusive mutation rights over one page.
struct SerialGuard<'p> {
    page: &'p ColPage,
    _gate: MutexGuard<'p, ()>,
}

impl<'p> SerialGuard<'p> {
    /// Page the guard grants rights over.
    fn page(&self) -> &'p ColPage {
        self.page
    }
}

/// Per-page single-writer dispatcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct PageSerializer;

impl PageSerializer {
    /// Creates a dispatcher.
    pub fn new() -> Self {
        Self
    }

    /// Runs `op` against `page` once no other operation holds the page.
    pub(crate) fn submit<'t>(&self, page: &'t ColPage, op: SerialOp<'t>) -> Result<SerialOutcome> {
        let guard = SerialGuard {
            page,
            _gate: page.gate.lock(),
        };
        match op {
            SerialOp::InstallReplacement { slot, array, repl } => {
                install_replacement(&guard, slot, array, repl)
            }
            SerialOp::InstallExpansion {
                slot,
                array,
                exp,
                repl,
            } => install_expansion(&guard, slot, array, exp, repl),
            SerialOp::AppendReplacement { slot, exp, repl } => {
                append_replacement(&guard, slot, exp, repl)
            }
        }
    }
}

fn check_slot(page: &ColPage, slot: usize) -> Result<()> {
    if slot >= page.slot_count() {
        return Err(ColStoreError::Invalid("slot index out of range"));
    }
    Ok(())
}

/// Adopts `candidate` as the page's array unless one is already installed,
/// in which case the candidate is returned as the loser.
fn adopt_array<T: overlay::ChainNode>(
    page: &ColPage,
    cell: &AtomicPtr<SlotArray<T>>,
    candidate: Option<Candidate<SlotArray<T>>>,
) -> Result<(bool, Option<Candidate<SlotArray<T>>>)> {
    if overlay::load_array(cell).is_some() {
        return Ok((false, candidate));
    }
    let Some(array) = candidate else {
        return Err(ColStoreError::Invalid(
            "overlay array absent and no candidate supplied",
        ));
    };
    if array.len() != page.slot_count() {
        return Err(ColStoreError::Invalid("overlay array sized for another page"));
    }
    page.charge(overlay::install_array(cell, array));
    tracing::debug!(page = %page.id(), slots = page.slot_count(), "overlay array installed");
    Ok((true, None))
}

/// Pushes `repl` onto `replacement[slot]` of an uncompressed page.
fn install_replacement(
    guard: &SerialGuard<'_>,
    slot: usize,
    array: Option<Candidate<SlotArray<Replacement>>>,
    repl: Candidate<Replacement>,
) -> Result<SerialOutcome> {
    let page = guard.page();
    check_slot(page, slot)?;
    let (array_adopted, loser) = adopt_array(page, &page.repl, array)?;
    let installed = overlay::load_array(&page.repl)
        .ok_or(ColStoreError::Invalid("replacement array missing after adoption"))?;
    page.charge(overlay::prepend_replacement(installed.link(slot)?, repl));
    page.mark_dirty();
    tracing::trace!(page = %page.id(), slot, "replacement published");
    Ok(SerialOutcome {
        applied: Applied::Replacement,
        array_adopted,
        leftovers: Leftovers {
            repl_array: loser,
            ..Leftovers::default()
        },
    })
}

/// Publishes `exp` (with `repl` as its only generation) at the head of run
/// `slot`, or pushes `repl` onto an entry for the same offset that was
/// published after the caller's search.
fn install_expansion(
    guard: &SerialGuard<'_>,
    slot: usize,
    array: Option<Candidate<SlotArray<Expansion>>>,
    exp: Candidate<Expansion>,
    repl: Candidate<Replacement>,
) -> Result<SerialOutcome> {
    let page = guard.page();
    check_slot(page, slot)?;
    let (array_adopted, loser) = adopt_array(page, &page.expcol, array)?;
    let installed = overlay::load_array(&page.expcol)
        .ok_or(ColStoreError::Invalid("expansion array missing after adoption"))?;
    let run_offset = exp.run_offset();
    let (applied, unused) = match installed
        .expansions(slot)
        .find(|existing| existing.run_offset() == run_offset)
    {
        Some(existing) => {
            page.charge(overlay::prepend_to_expansion(existing, repl));
            tracing::debug!(
                page = %page.id(),
                slot,
                run_offset,
                "record expanded concurrently; appended to existing entry"
            );
            (Applied::MergedIntoExisting, Some(exp))
        }
        None => {
            page.charge(overlay::prepend_expansion(installed.link(slot)?, exp, repl));
            tracing::trace!(page = %page.id(), slot, run_offset, "expansion published");
            (Applied::Expansion, None)
        }
    };
    page.mark_dirty();
    Ok(SerialOutcome {
        applied,
        array_adopted,
        leftovers: Leftovers {
            exp_array: loser,
            expansion: unused,
            ..Leftovers::default()
        },
    })
}

/// Pushes `repl` onto an already published expansion entry. The entry must
/// hang off run `slot` of the guarded page.
fn append_replacement(
    guard: &SerialGuard<'_>,
    slot: usize,
    exp: &Expansion,
    repl: Candidate<Replacement>,
) -> Result<SerialOutcome> {
    let page = guard.page();
    check_slot(page, slot)?;
    if !page.expansions(slot).any(|entry| ptr::eq(entry, exp)) {
        return Err(ColStoreError::Invalid(
            "expansion entry does not belong to this page",
        ));
    }
    page.charge(overlay::prepend_to_expansion(exp, repl));
    page.mark_dirty();
    tracing::trace!(page = %page.id(), run_offset = exp.run_offset(), "replacement appended");
    Ok(SerialOutcome {
        applied: Applied::AppendedToExpansion,
        array_adopted: false,
        leftovers: Leftovers::default(),
    })
}

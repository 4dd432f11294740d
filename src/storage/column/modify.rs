//! Delete and update of individual records.
//!
//! A modification is classified into one of three paths:
//!
//! 1. uncompressed store: push a new [`Replacement`] onto the record's slot;
//! 2. compressed store, record not yet expanded: publish a new [`Expansion`]
//!    entry for the record, carrying its first replacement;
//! 3. compressed store, record already expanded: push a new replacement onto
//!    the existing entry.
//!
//! Every node (and, if the page has none yet, the overlay array) is
//! allocated before anything is submitted, so an allocation failure leaves
//! the page untouched. Whatever the serializer does not adopt is freed here.

use super::image::Location;
use super::overlay::{Expansion, Replacement, SlotArray};
use super::page::ColPage;
use super::serial::{Applied, Leftovers, SerialOp};
use super::tree::ColumnTree;
use crate::primitives::alloc::Candidate;
use crate::types::{ColStoreError, ErrorKind, Result};

#[derive(Clone, Copy, Debug)]
enum Change<'a> {
    Delete,
    Update(&'a [u8]),
}

impl ColumnTree {
    /// Marks `recno` deleted.
    pub fn delete(&self, recno: u64) -> Result<Applied> {
        self.modify(recno, Change::Delete)
    }

    /// Replaces the value of `recno`. `value` must match the column width.
    pub fn update(&self, recno: u64, value: &[u8]) -> Result<Applied> {
        if value.len() != self.options().value_len as usize {
            return Err(ColStoreError::Invalid("value width does not match column"));
        }
        self.modify(recno, Change::Update(value))
    }

    fn modify(&self, recno: u64, change: Change<'_>) -> Result<Applied> {
        let hit = self.search(recno)?;
        let page = hit.pin.page();
        let result = match self.prepare(page, hit.loc, hit.expansion, change) {
            Ok(op) => self.submit(page, op),
            Err(err) => {
                if err.kind() == ErrorKind::OutOfMemory {
                    self.stats.inc_alloc_failures();
                    tracing::warn!(recno, page = %page.id(), error = %err, "modification abandoned");
                }
                Err(err)
            }
        };
        hit.pin.release();
        result
    }

    fn new_replacement(&self, change: Change<'_>) -> Result<Candidate<Replacement>> {
        match change {
            Change::Delete => Replacement::tombstone(&self.alloc),
            Change::Update(value) => Replacement::with_data(&self.alloc, value),
        }
    }

    fn prepare<'t>(
        &self,
        page: &'t ColPage,
        loc: Location,
        expansion: Option<&'t Expansion>,
        change: Change<'_>,
    ) -> Result<SerialOp<'t>> {
        if !self.options().repeat_compression {
            let array = match page.replacement_array() {
                Some(_) => None,
                None => Some(SlotArray::candidate(&self.alloc, page.slot_count())?),
            };
            let repl = self.new_replacement(change)?;
            tracing::trace!(page = %page.id(), slot = loc.slot, "modify via replacement");
            return Ok(SerialOp::InstallReplacement {
                slot: loc.slot,
                array,
                repl,
            });
        }
        if let Some(exp) = expansion {
            let repl = self.new_replacement(change)?;
            tracing::trace!(
                page = %page.id(),
                slot = loc.slot,
                run_offset = loc.run_offset,
                "modify via existing expansion"
            );
            return Ok(SerialOp::AppendReplacement {
                slot: loc.slot,
                exp,
                repl,
            });
        }
        let array = match page.expansion_array() {
            Some(_) => None,
            None => Some(SlotArray::candidate(&self.alloc, page.slot_count())?),
        };
        let exp = Expansion::candidate(&self.alloc, loc.run_offset)?;
        let repl = self.new_replacement(change)?;
        tracing::trace!(
            page = %page.id(),
            slot = loc.slot,
            run_offset = loc.run_offset,
            "modify via new expansion"
        );
        Ok(SerialOp::InstallExpansion {
            slot: loc.slot,
            array,
            exp,
            repl,
        })
    }

    fn submit(&self, page: &ColPage, op: SerialOp<'_>) -> Result<Applied> {
        let outcome = self.serializer.submit(page, op)?;
        match outcome.applied {
            Applied::Replacement => self.stats.inc_replacements_installed(),
            Applied::Expansion => self.stats.inc_expansions_installed(),
            Applied::AppendedToExpansion => self.stats.inc_expansion_appends(),
            Applied::MergedIntoExisting => {
                self.stats.inc_stale_expansions_merged();
                self.stats.inc_expansion_appends();
            }
        }
        if outcome.array_adopted {
            self.stats.inc_arrays_adopted();
        }
        self.dispose(page, outcome.leftovers);
        Ok(outcome.applied)
    }

    fn dispose(&self, page: &ColPage, leftovers: Leftovers) {
        let Leftovers {
            repl_array,
            exp_array,
            expansion,
        } = leftovers;
        if let Some(array) = repl_array {
            debug_assert!(!page.is_current_repl_array(array.as_ptr()));
            self.stats.inc_arrays_discarded();
            tracing::debug!(page = %page.id(), "replacement array lost adoption; freeing");
            array.discard();
        }
        if let Some(array) = exp_array {
            debug_assert!(!page.is_current_exp_array(array.as_ptr()));
            self.stats.inc_arrays_discarded();
            tracing::debug!(page = %page.id(), "expansion array lost adoption; freeing");
            array.discard();
        }
        if let Some(exp) = expansion {
            exp.discard();
        }
    }
}

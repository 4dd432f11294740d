#![allow(unsafe_code)]

//! Overlay nodes layered over an immutable column page.
//!
//! Nodes are reachable only through [`AtomicPtr`] links. Writers publish a
//! node with a `Release` store after every field of the node has been
//! written; readers dereference only after an `Acquire` load. That pairing
//! is the only synchronisation between the page serializer and readers.
//!
//! Published nodes are never unlinked, mutated (other than their chain-head
//! link, which only ever moves to a newer node) or freed while the owning
//! page is alive. Every reference handed out by this module is therefore
//! bounded by a borrow of the page, through the array that anchors it.

use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::primitives::alloc::{Candidate, OverlayAlloc};
use crate::types::{ColStoreError, Result};

/// Ordering for readers dereferencing a published pointer.
const READ_ORD: AtomicOrdering = AtomicOrdering::Acquire;
/// Ordering for the store that publishes a fully initialised node.
const PUBLISH_ORD: AtomicOrdering = AtomicOrdering::Release;
/// Ordering for writes to a node that is not yet reachable, and for the
/// serializer re-reading links it wrote itself.
const PRIVATE_ORD: AtomicOrdering = AtomicOrdering::Relaxed;

/// Value carried by a [`Replacement`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplValue {
    /// Reserved marker: the record is deleted.
    Deleted,
    /// New value for the record.
    Data(Box<[u8]>),
}

impl ReplValue {
    /// Returns the replacement bytes, or `None` for a tombstone.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            ReplValue::Deleted => None,
            ReplValue::Data(bytes) => Some(bytes),
        }
    }

    fn heap_len(&self) -> usize {
        self.data().map_or(0, <[u8]>::len)
    }
}

/// One generation of a record's value, linked newest-first.
#[derive(Debug)]
pub struct Replacement {
    value: ReplValue,
    next: AtomicPtr<Replacement>,
}

impl Replacement {
    /// Allocates an unlinked tombstone.
    pub fn tombstone(alloc: &Arc<dyn OverlayAlloc>) -> Result<Candidate<Self>> {
        Candidate::try_new(
            alloc,
            size_of::<Self>(),
            Self {
                value: ReplValue::Deleted,
                next: AtomicPtr::new(ptr::null_mut()),
            },
        )
    }

    /// Allocates an unlinked replacement carrying a copy of `data`.
    pub fn with_data(alloc: &Arc<dyn OverlayAlloc>, data: &[u8]) -> Result<Candidate<Self>> {
        let bytes = size_of::<Self>() + data.len();
        Candidate::try_new_with(alloc, bytes, || {
            let mut buf = Vec::new();
            buf.try_reserve_exact(data.len())
                .map_err(|_| ColStoreError::OutOfMemory { bytes: data.len() })?;
            buf.extend_from_slice(data);
            Ok(Self {
                value: ReplValue::Data(buf.into_boxed_slice()),
                next: AtomicPtr::new(ptr::null_mut()),
            })
        })
    }

    /// Value of this generation.
    pub fn value(&self) -> &ReplValue {
        &self.value
    }

    /// Returns `true` when this generation deletes the record.
    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, ReplValue::Deleted)
    }

    /// The next older generation.
    pub fn next(&self) -> Option<&Replacement> {
        // SAFETY: `next` is null or was published by `prepend_replacement`,
        // which hands over a live boxed node; nodes outlive `self`'s page.
        unsafe { self.next.load(READ_ORD).as_ref() }
    }

    /// Approximate heap footprint attributed to this node.
    pub fn footprint(&self) -> usize {
        size_of::<Self>() + self.value.heap_len()
    }
}

/// One record distinguished out of a compressed run.
#[derive(Debug)]
pub struct Expansion {
    run_offset: u32,
    replacement: AtomicPtr<Replacement>,
    next: AtomicPtr<Expansion>,
}

impl Expansion {
    /// Allocates an unlinked expansion entry for `run_offset`. Its replacement
    /// chain is linked when the entry is published.
    pub fn candidate(alloc: &Arc<dyn OverlayAlloc>, run_offset: u32) -> Result<Candidate<Self>> {
        Candidate::try_new(
            alloc,
            size_of::<Self>(),
            Self {
                run_offset,
                replacement: AtomicPtr::new(ptr::null_mut()),
                next: AtomicPtr::new(ptr::null_mut()),
            },
        )
    }

    /// Position within the run this entry stands for.
    pub fn run_offset(&self) -> u32 {
        self.run_offset
    }

    /// Newest replacement for the record.
    pub fn head(&self) -> Option<&Replacement> {
        // SAFETY: see `Replacement::next`.
        unsafe { self.replacement.load(READ_ORD).as_ref() }
    }

    /// Iterates the replacement chain newest-first.
    pub fn replacements(&self) -> ReplIter<'_> {
        ReplIter { cur: self.head() }
    }

    /// Next entry in the run's chain.
    pub fn next(&self) -> Option<&Expansion> {
        // SAFETY: `next` is null or was published by `prepend_expansion`.
        unsafe { self.next.load(READ_ORD).as_ref() }
    }
}

/// Newest-first walk of a replacement chain.
#[derive(Clone, Debug, Default)]
pub struct ReplIter<'a> {
    cur: Option<&'a Replacement>,
}

impl<'a> Iterator for ReplIter<'a> {
    type Item = &'a Replacement;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        self.cur = cur.next();
        Some(cur)
    }
}

/// Newest-first walk of a run's expansion entries.
#[derive(Clone, Debug, Default)]
pub struct ExpansionIter<'a> {
    cur: Option<&'a Expansion>,
}

impl<'a> Iterator for ExpansionIter<'a> {
    type Item = &'a Expansion;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        self.cur = cur.next();
        Some(cur)
    }
}

/// Nodes that form singly linked chains anchored in a [`SlotArray`].
pub trait ChainNode: Sized {
    /// Link to the next older node.
    fn next_link(&mut self) -> &mut AtomicPtr<Self>;
    /// Frees whatever the node owns besides its successor.
    fn release_owned(&mut self) {}
}

impl ChainNode for Replacement {
    fn next_link(&mut self) -> &mut AtomicPtr<Self> {
        &mut self.next
    }
}

impl ChainNode for Expansion {
    fn next_link(&mut self) -> &mut AtomicPtr<Self> {
        &mut self.next
    }

    fn release_owned(&mut self) {
        let head = std::mem::replace(self.replacement.get_mut(), ptr::null_mut());
        // SAFETY: the chain hanging off an entry is owned by it alone and the
        // entry is being torn down with exclusive access.
        unsafe { free_chain(head) };
    }
}

/// Per-page array of chain heads, one per slot.
#[derive(Debug)]
pub struct SlotArray<T: ChainNode> {
    heads: Box<[AtomicPtr<T>]>,
}

impl<T: ChainNode> SlotArray<T> {
    /// Bytes charged for an array of `len` slots.
    pub fn footprint(len: usize) -> usize {
        size_of::<Self>() + len * size_of::<AtomicPtr<T>>()
    }

    /// Allocates an array of empty heads.
    pub fn candidate(alloc: &Arc<dyn OverlayAlloc>, len: usize) -> Result<Candidate<Self>> {
        let bytes = Self::footprint(len);
        Candidate::try_new_with(alloc, bytes, || {
            let mut heads = Vec::new();
            heads
                .try_reserve_exact(len)
                .map_err(|_| ColStoreError::OutOfMemory { bytes })?;
            heads.extend((0..len).map(|_| AtomicPtr::new(ptr::null_mut())));
            Ok(Self {
                heads: heads.into_boxed_slice(),
            })
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// Returns `true` for a zero-slot array.
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Newest node anchored at `slot`.
    pub fn head(&self, slot: usize) -> Option<&T> {
        let link = self.heads.get(slot)?;
        // SAFETY: heads are null or published by a prepend helper; nodes live
        // as long as this array.
        unsafe { link.load(READ_ORD).as_ref() }
    }

    pub(super) fn link(&self, slot: usize) -> Result<&AtomicPtr<T>> {
        self.heads
            .get(slot)
            .ok_or(ColStoreError::Invalid("slot index out of range"))
    }
}

impl SlotArray<Replacement> {
    /// Iterates the replacement chain at `slot` newest-first.
    pub fn replacements(&self, slot: usize) -> ReplIter<'_> {
        ReplIter {
            cur: self.head(slot),
        }
    }
}

impl SlotArray<Expansion> {
    /// Iterates the expansion entries at `slot` newest-first.
    pub fn expansions(&self, slot: usize) -> ExpansionIter<'_> {
        ExpansionIter {
            cur: self.head(slot),
        }
    }
}

impl<T: ChainNode> Drop for SlotArray<T> {
    fn drop(&mut self) {
        for link in self.heads.iter_mut() {
            let head = std::mem::replace(link.get_mut(), ptr::null_mut());
            // SAFETY: dropping the array means the page is gone; no reader
            // can hold a reference into the chains it anchors.
            unsafe { free_chain(head) };
        }
    }
}

/// Frees every node of a chain iteratively.
///
/// # Safety
///
/// `head` must be null or the start of a chain built by the prepend helpers
/// in this module that nothing else references.
unsafe fn free_chain<T: ChainNode>(mut cur: *mut T) {
    while !cur.is_null() {
        let mut node = Box::from_raw(cur);
        cur = *node.next_link().get_mut();
        node.release_owned();
    }
}

/// Loads an array anchor for reading.
pub(super) fn load_array<T: ChainNode>(cell: &AtomicPtr<SlotArray<T>>) -> Option<&SlotArray<T>> {
    // SAFETY: anchors are null or published by `install_array` and never
    // replaced or freed while the owning page is alive.
    unsafe { cell.load(READ_ORD).as_ref() }
}

/// Takes an anchor out of a page that is being torn down.
pub(super) fn take_array<T: ChainNode>(
    cell: &mut AtomicPtr<SlotArray<T>>,
) -> Option<Box<SlotArray<T>>> {
    let raw = std::mem::replace(cell.get_mut(), ptr::null_mut());
    if raw.is_null() {
        return None;
    }
    // SAFETY: anchors are only ever set by `install_array` from a boxed
    // array, and `&mut` access rules out concurrent readers.
    Some(unsafe { Box::from_raw(raw) })
}

/// Publishes `array` as the page's anchor. Returns the charge transferred.
///
/// Callers hold the page's write gate and have observed the anchor empty.
pub(super) fn install_array<T: ChainNode>(
    cell: &AtomicPtr<SlotArray<T>>,
    array: Candidate<SlotArray<T>>,
) -> usize {
    debug_assert!(cell.load(PRIVATE_ORD).is_null(), "anchor already installed");
    let (boxed, bytes) = array.into_adopted();
    cell.store(Box::into_raw(boxed), PUBLISH_ORD);
    bytes
}

/// Links `repl` in front of the chain at `head` and publishes it.
///
/// Callers hold the page's write gate.
pub(super) fn prepend_replacement(
    head: &AtomicPtr<Replacement>,
    repl: Candidate<Replacement>,
) -> usize {
    repl.next.store(head.load(PRIVATE_ORD), PRIVATE_ORD);
    let (boxed, bytes) = repl.into_adopted();
    head.store(Box::into_raw(boxed), PUBLISH_ORD);
    bytes
}

/// Appends a newer generation to an already published expansion entry.
pub(super) fn prepend_to_expansion(exp: &Expansion, repl: Candidate<Replacement>) -> usize {
    prepend_replacement(&exp.replacement, repl)
}

/// Links `repl` as the entry's only replacement, links the entry in front of
/// the run chain at `head`, and publishes the entry.
///
/// Callers hold the page's write gate.
pub(super) fn prepend_expansion(
    head: &AtomicPtr<Expansion>,
    exp: Candidate<Expansion>,
    repl: Candidate<Replacement>,
) -> usize {
    let repl_bytes = prepend_replacement(&exp.replacement, repl);
    exp.next.store(head.load(PRIVATE_ORD), PRIVATE_ORD);
    let (boxed, bytes) = exp.into_adopted();
    head.store(Box::into_raw(boxed), PUBLISH_ORD);
    bytes + repl_bytes
}

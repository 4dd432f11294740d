use std::sync::atomic::{
    AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering as AtomicOrdering,
};
use std::sync::Arc;
use std::{fmt, ptr};

use parking_lot::Mutex;

use super::image::{Header, ImageKind, ImageView, Location};
use super::overlay::{self, Expansion, ExpansionIter, ReplIter, Replacement, SlotArray};
use crate::primitives::alloc::OverlayAlloc;
use crate::types::{PageId, Result};

/// A column-store leaf: an immutable compressed image plus the overlay of
/// in-memory modifications made since it was loaded.
///
/// Overlay arrays start absent and are installed at most once each, by the
/// page serializer. Reads never lock.
pub struct ColPage {
    id: PageId,
    header: Header,
    image: Box<[u8]>,
    root: bool,
    pins: AtomicU32,
    pub(super) repl: AtomicPtr<SlotArray<Replacement>>,
    pub(super) expcol: AtomicPtr<SlotArray<Expansion>>,
    dirty: AtomicBool,
    write_gen: AtomicU64,
    overlay_bytes: AtomicUsize,
    pub(super) gate: Mutex<()>,
    alloc: Arc<dyn OverlayAlloc>,
}

impl ColPage {
    /// Wraps a validated image.
    pub fn new(
        id: PageId,
        image: Vec<u8>,
        root: bool,
        alloc: Arc<dyn OverlayAlloc>,
    ) -> Result<Self> {
        let header = Header::parse(&image)?;
        Ok(Self {
            id,
            header,
            image: image.into_boxed_slice(),
            root,
            pins: AtomicU32::new(0),
            repl: AtomicPtr::new(ptr::null_mut()),
            expcol: AtomicPtr::new(ptr::null_mut()),
            dirty: AtomicBool::new(false),
            write_gen: AtomicU64::new(0),
            overlay_bytes: AtomicUsize::new(0),
            gate: Mutex::new(()),
            alloc,
        })
    }

    /// Directory position of the page.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Decoded image header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Read-only view of the compressed image.
    pub fn view(&self) -> ImageView<'_> {
        ImageView::new(&self.header, &self.image)
    }

    /// Raw image bytes.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Number of slots (records, or runs when compressed).
    pub fn slot_count(&self) -> usize {
        self.header.slot_count as usize
    }

    /// Returns `true` for repeat-count compressed images.
    pub fn is_compressed(&self) -> bool {
        self.header.kind == ImageKind::RepeatCompressed
    }

    /// Returns `true` for the tree's long-lived root page.
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Outstanding pins.
    pub fn pin_count(&self) -> u32 {
        self.pins.load(AtomicOrdering::Acquire)
    }

    pub(super) fn pin(&self) {
        self.pins.fetch_add(1, AtomicOrdering::AcqRel);
    }

    pub(super) fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, AtomicOrdering::AcqRel);
        debug_assert!(prev > 0, "unpin of unpinned page {}", self.id);
    }

    /// Returns `true` once any modification has been published.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(AtomicOrdering::Acquire)
    }

    /// Number of modifications published on this page.
    pub fn write_gen(&self) -> u64 {
        self.write_gen.load(AtomicOrdering::Acquire)
    }

    /// Bytes charged for overlay structures owned by this page.
    pub fn overlay_bytes(&self) -> usize {
        self.overlay_bytes.load(AtomicOrdering::Relaxed)
    }

    /// Replacement array, once installed.
    pub fn replacement_array(&self) -> Option<&SlotArray<Replacement>> {
        overlay::load_array(&self.repl)
    }

    /// Expansion array, once installed.
    pub fn expansion_array(&self) -> Option<&SlotArray<Expansion>> {
        overlay::load_array(&self.expcol)
    }

    /// Replacement chain for a slot of an uncompressed page.
    pub fn replacements(&self, slot: usize) -> ReplIter<'_> {
        match self.replacement_array() {
            Some(array) => array.replacements(slot),
            None => ReplIter::default(),
        }
    }

    /// Expansion entries for a run of a compressed page.
    pub fn expansions(&self, slot: usize) -> ExpansionIter<'_> {
        match self.expansion_array() {
            Some(array) => array.expansions(slot),
            None => ExpansionIter::default(),
        }
    }

    /// Expansion entry for one record of a run, if it has been distinguished.
    pub fn find_expansion(&self, slot: usize, run_offset: u32) -> Option<&Expansion> {
        self.expansions(slot)
            .find(|exp| exp.run_offset() == run_offset)
    }

    /// Newest overlay generation for the record at `loc`.
    pub fn current(&self, loc: Location) -> Option<&Replacement> {
        if self.is_compressed() {
            self.find_expansion(loc.slot, loc.run_offset)
                .and_then(Expansion::head)
        } else {
            self.replacements(loc.slot).next()
        }
    }

    /// Resolves the record at `loc` through the overlay to its current value;
    /// `None` when the record is deleted.
    pub fn read(&self, loc: Location) -> Result<Option<Vec<u8>>> {
        match self.current(loc) {
            Some(repl) => Ok(repl.value().data().map(<[u8]>::to_vec)),
            None => Ok(Some(self.view().value(loc.slot)?.to_vec())),
        }
    }

    pub(super) fn charge(&self, bytes: usize) {
        self.overlay_bytes.fetch_add(bytes, AtomicOrdering::Relaxed);
    }

    /// Records a published modification; ordered after the structural store.
    pub(super) fn mark_dirty(&self) {
        self.write_gen.fetch_add(1, AtomicOrdering::Release);
        self.dirty.store(true, AtomicOrdering::Release);
    }

    pub(super) fn is_current_repl_array(&self, candidate: *const SlotArray<Replacement>) -> bool {
        ptr::eq(self.repl.load(AtomicOrdering::Acquire), candidate)
    }

    pub(super) fn is_current_exp_array(&self, candidate: *const SlotArray<Expansion>) -> bool {
        ptr::eq(self.expcol.load(AtomicOrdering::Acquire), candidate)
    }
}

impl fmt::Debug for ColPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColPage")
            .field("id", &self.id)
            .field("header", &self.header)
            .field("root", &self.root)
            .field("pins", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("overlay_bytes", &self.overlay_bytes())
            .finish()
    }
}

impl Drop for ColPage {
    fn drop(&mut self) {
        drop(overlay::take_array(&mut self.repl));
        drop(overlay::take_array(&mut self.expcol));
        let bytes = *self.overlay_bytes.get_mut();
        if bytes > 0 {
            self.alloc.release(bytes);
        }
    }
}

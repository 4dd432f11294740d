use std::path::Path;
use std::sync::Arc;

use super::file::read_column_file;
use super::image::{ImageKind, Location};
use super::overlay::Expansion;
use super::page::ColPage;
use super::serial::PageSerializer;
use super::stats::{ColumnStats, ColumnStatsSnapshot};
use crate::primitives::alloc::{AccountingAlloc, OverlayAlloc};
use crate::storage::options::ColumnOptions;
use crate::types::{ColStoreError, PageId, Result};

/// A column store: a directory of compressed leaf pages, ordered by record
/// number, each carrying its own modification overlay.
///
/// The first page is the root. It stays pinned for the lifetime of the tree;
/// every other page is pinned only while an operation is using it.
pub struct ColumnTree {
    pages: Vec<ColPage>,
    options: ColumnOptions,
    pub(super) alloc: Arc<dyn OverlayAlloc>,
    pub(super) serializer: PageSerializer,
    pub(super) stats: Arc<ColumnStats>,
}

/// Pin on a page taken by search; dropping it releases the page unless it is
/// the root.
#[must_use = "dropping the pin releases the page"]
#[derive(Debug)]
pub struct PagePin<'t> {
    page: &'t ColPage,
}

impl<'t> PagePin<'t> {
    fn acquire(page: &'t ColPage) -> Self {
        if !page.is_root() {
            page.pin();
        }
        Self { page }
    }

    /// The pinned page.
    pub fn page(&self) -> &'t ColPage {
        self.page
    }

    /// Releases the page explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PagePin<'_> {
    fn drop(&mut self) {
        if !self.page.is_root() {
            self.page.unpin();
        }
    }
}

/// Where search found a record.
#[derive(Debug)]
pub struct SearchHit<'t> {
    /// Pin on the page holding the record.
    pub pin: PagePin<'t>,
    /// Slot and run offset of the record.
    pub loc: Location,
    /// Existing expansion entry for the record, on compressed pages.
    pub expansion: Option<&'t Expansion>,
}

impl ColumnTree {
    /// Opens a tree over `images`, charging overlay memory to an
    /// [`AccountingAlloc`] bounded by `options.overlay_budget_bytes`.
    pub fn open(images: Vec<Vec<u8>>, options: ColumnOptions) -> Result<Self> {
        let alloc = Arc::new(AccountingAlloc::with_budget(options.overlay_budget_bytes));
        Self::open_with_alloc(images, options, alloc)
    }

    /// Opens a tree over `images` using a caller-supplied allocator.
    pub fn open_with_alloc(
        images: Vec<Vec<u8>>,
        options: ColumnOptions,
        alloc: Arc<dyn OverlayAlloc>,
    ) -> Result<Self> {
        options.validate()?;
        if images.is_empty() {
            return Err(ColStoreError::Invalid("column tree needs at least one page"));
        }
        let expected_kind = if options.repeat_compression {
            ImageKind::RepeatCompressed
        } else {
            ImageKind::Fixed
        };
        let mut pages = Vec::with_capacity(images.len());
        // Last record of the previous page.
        let mut prev_last: Option<u64> = None;
        for (idx, image) in images.into_iter().enumerate() {
            let page = ColPage::new(PageId(idx as u64), image, idx == 0, Arc::clone(&alloc))?;
            let header = page.header();
            if header.kind != expected_kind {
                return Err(ColStoreError::Invalid(
                    "page compression does not match options",
                ));
            }
            if header.value_len != options.value_len {
                return Err(ColStoreError::Invalid("page value width does not match options"));
            }
            if header.slot_count == 0 {
                return Err(ColStoreError::Corruption("column page without slots"));
            }
            if let Some(last) = prev_last {
                if last.checked_add(1) != Some(header.start_recno) {
                    return Err(ColStoreError::Corruption("page directory not contiguous"));
                }
            }
            // slot_count > 0 and every repeat is at least one.
            let records = page.view().record_count()?;
            prev_last = Some(
                header
                    .start_recno
                    .checked_add(records - 1)
                    .ok_or(ColStoreError::Corruption(
                        "page records exceed the record number space",
                    ))?,
            );
            pages.push(page);
        }
        pages[0].pin();
        tracing::debug!(
            pages = pages.len(),
            repeat_compression = options.repeat_compression,
            "column tree opened"
        );
        Ok(Self {
            pages,
            options,
            alloc,
            serializer: PageSerializer::new(),
            stats: Arc::new(ColumnStats::default()),
        })
    }

    /// Opens a tree over the images stored in a column file.
    pub fn open_file(path: impl AsRef<Path>, options: ColumnOptions) -> Result<Self> {
        let images = read_column_file(path, options.verify_checksums)?;
        Self::open(images, options)
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &ColumnOptions {
        &self.options
    }

    /// The pinned root page.
    pub fn root(&self) -> &ColPage {
        &self.pages[0]
    }

    /// All pages in record order.
    pub fn pages(&self) -> &[ColPage] {
        &self.pages
    }

    /// Page at a directory position.
    pub fn page(&self, id: PageId) -> Option<&ColPage> {
        self.pages.get(usize::try_from(id.0).ok()?)
    }

    /// Allocator overlay structures are charged to.
    pub fn alloc(&self) -> &Arc<dyn OverlayAlloc> {
        &self.alloc
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<ColumnStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> ColumnStatsSnapshot {
        self.stats.snapshot()
    }

    /// First record number held by the tree.
    pub fn first_recno(&self) -> u64 {
        self.root().header().start_recno
    }

    /// Total records held by the tree, including deleted ones.
    pub fn record_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for page in &self.pages {
            total = total
                .checked_add(page.view().record_count()?)
                .ok_or(ColStoreError::Invalid("record count exceeds u64"))?;
        }
        Ok(total)
    }

    /// Locates `recno`, pins its page and, on compressed pages, looks up an
    /// existing expansion entry for it.
    pub fn search(&self, recno: u64) -> Result<SearchHit<'_>> {
        self.stats.inc_searches();
        let idx = self
            .pages
            .partition_point(|page| page.header().start_recno <= recno);
        let Some(page) = idx.checked_sub(1).and_then(|idx| self.pages.get(idx)) else {
            self.stats.inc_not_found();
            return Err(ColStoreError::NotFound { recno });
        };
        let pin = PagePin::acquire(page);
        let Some(loc) = page.view().locate(recno)? else {
            self.stats.inc_not_found();
            return Err(ColStoreError::NotFound { recno });
        };
        let expansion = if page.is_compressed() {
            page.find_expansion(loc.slot, loc.run_offset)
        } else {
            None
        };
        Ok(SearchHit {
            pin,
            loc,
            expansion,
        })
    }

    /// Current value of `recno` through the overlay; `None` once deleted.
    pub fn get(&self, recno: u64) -> Result<Option<Vec<u8>>> {
        let hit = self.search(recno)?;
        let value = hit.pin.page().read(hit.loc);
        hit.pin.release();
        value
    }
}

impl Drop for ColumnTree {
    fn drop(&mut self) {
        if let Some(root) = self.pages.first() {
            root.unpin();
        }
    }
}

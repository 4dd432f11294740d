#![forbid(unsafe_code)]

//! Fallible, accounted allocation for overlay structures.
//!
//! Every overlay node and array is charged against an [`OverlayAlloc`] before
//! it is built. A freshly built node is held as a [`Candidate`], which owns
//! both the value and its charge: the candidate is either adopted by a page
//! (the charge moves with it) or dropped, which returns the charge.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::types::{ColStoreError, Result};

/// Allocation interface consumed by the overlay.
pub trait OverlayAlloc: Send + Sync {
    /// Charges `bytes` against the allocator, failing with
    /// [`ColStoreError::OutOfMemory`] when the request cannot be met.
    fn reserve(&self, bytes: usize) -> Result<()>;
    /// Returns a charge previously granted by [`OverlayAlloc::reserve`].
    fn release(&self, bytes: usize);
}

/// Snapshot of allocator counters.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct AllocStats {
    /// Bytes currently charged.
    pub live_bytes: usize,
    /// Highest value `live_bytes` has reached.
    pub peak_bytes: usize,
    /// Successful reservations.
    pub allocations: u64,
    /// Releases.
    pub frees: u64,
    /// Reservations that were refused.
    pub failures: u64,
}

/// Byte-accounting allocator with an optional budget.
///
/// A failure point can be armed with [`AccountingAlloc::fail_after`] so tests
/// can drive the out-of-memory paths deterministically.
pub struct AccountingAlloc {
    budget: Option<usize>,
    live: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicU64,
    frees: AtomicU64,
    failures: AtomicU64,
    /// Successful reservations left before the armed failure; negative when disarmed.
    fail_countdown: AtomicI64,
}

impl AccountingAlloc {
    /// Creates an allocator without a byte budget.
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    /// Creates an allocator that refuses reservations beyond `budget` live bytes.
    pub fn with_budget(budget: Option<usize>) -> Self {
        Self {
            budget,
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            fail_countdown: AtomicI64::new(-1),
        }
    }

    /// Arms a failure: the next `successes` reservations succeed and the one
    /// after fails. The failure point disarms itself once it fires.
    pub fn fail_after(&self, successes: u32) {
        self.fail_countdown
            .store(i64::from(successes), AtomicOrdering::SeqCst);
    }

    /// Disarms any pending failure point.
    pub fn disarm(&self) {
        self.fail_countdown.store(-1, AtomicOrdering::SeqCst);
    }

    /// Returns the configured budget.
    pub fn budget(&self) -> Option<usize> {
        self.budget
    }

    /// Snapshot the current counters.
    pub fn stats(&self) -> AllocStats {
        AllocStats {
            live_bytes: self.live.load(AtomicOrdering::Relaxed),
            peak_bytes: self.peak.load(AtomicOrdering::Relaxed),
            allocations: self.allocations.load(AtomicOrdering::Relaxed),
            frees: self.frees.load(AtomicOrdering::Relaxed),
            failures: self.failures.load(AtomicOrdering::Relaxed),
        }
    }

    fn injected_failure(&self) -> bool {
        let mut fired = false;
        let _ = self
            .fail_countdown
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |left| {
                fired = left == 0;
                match left {
                    n if n < 0 => None,
                    0 => Some(-1),
                    n => Some(n - 1),
                }
            });
        fired
    }

    fn refuse(&self, bytes: usize) -> ColStoreError {
        self.failures.fetch_add(1, AtomicOrdering::Relaxed);
        ColStoreError::OutOfMemory { bytes }
    }
}

impl Default for AccountingAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AccountingAlloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountingAlloc")
            .field("budget", &self.budget)
            .field("stats", &self.stats())
            .finish()
    }
}

impl OverlayAlloc for AccountingAlloc {
    fn reserve(&self, bytes: usize) -> Result<()> {
        if self.injected_failure() {
            return Err(self.refuse(bytes));
        }
        let budget = self.budget;
        let updated = self
            .live
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |live| {
                let next = live.checked_add(bytes)?;
                match budget {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            });
        match updated {
            Ok(prev) => {
                self.peak.fetch_max(prev + bytes, AtomicOrdering::Relaxed);
                self.allocations.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(())
            }
            Err(_) => Err(self.refuse(bytes)),
        }
    }

    fn release(&self, bytes: usize) {
        self.live.fetch_sub(bytes, AtomicOrdering::AcqRel);
        self.frees.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// A speculatively allocated overlay value that a page has not adopted yet.
///
/// Dropping a candidate (directly or through [`Candidate::discard`]) returns
/// its charge to the allocator. [`Candidate::into_adopted`] hands the value
/// and its charge to the page instead.
#[must_use = "a candidate must be adopted by a page or discarded"]
pub struct Candidate<T> {
    value: Option<Box<T>>,
    bytes: usize,
    alloc: Arc<dyn OverlayAlloc>,
}

impl<T> Candidate<T> {
    /// Charges `bytes` and builds the value. If `build` fails the charge is
    /// returned before the error propagates.
    pub fn try_new_with<F>(alloc: &Arc<dyn OverlayAlloc>, bytes: usize, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T>,
    {
        alloc.reserve(bytes)?;
        match build() {
            Ok(value) => Ok(Self {
                value: Some(Box::new(value)),
                bytes,
                alloc: Arc::clone(alloc),
            }),
            Err(err) => {
                alloc.release(bytes);
                Err(err)
            }
        }
    }

    /// Charges `bytes` for an already constructed value.
    pub fn try_new(alloc: &Arc<dyn OverlayAlloc>, bytes: usize, value: T) -> Result<Self> {
        Self::try_new_with(alloc, bytes, || Ok(value))
    }

    /// Bytes charged for this candidate.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Address the value will keep once adopted.
    pub fn as_ptr(&self) -> *const T {
        self.value
            .as_deref()
            .map_or(std::ptr::null(), |value| value as *const T)
    }

    /// Releases the candidate and its charge.
    pub fn discard(self) {
        drop(self);
    }

    /// Transfers ownership of the value and its charge to the caller, which
    /// becomes responsible for eventually freeing both.
    pub(crate) fn into_adopted(mut self) -> (Box<T>, usize) {
        let bytes = self.bytes;
        let value = self
            .value
            .take()
            .unwrap_or_else(|| unreachable!("candidate consumed twice"));
        (value, bytes)
    }
}

impl<T> std::ops::Deref for Candidate<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_deref()
            .unwrap_or_else(|| unreachable!("candidate already adopted"))
    }
}

impl<T> Drop for Candidate<T> {
    fn drop(&mut self) {
        if self.value.take().is_some() {
            self.alloc.release(self.bytes);
        }
    }
}

impl<T> fmt::Debug for Candidate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("ptr", &self.as_ptr())
            .field("bytes", &self.bytes)
            .finish()
    }
}

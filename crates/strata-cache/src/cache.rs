//! Page cache manager.

use crate::slot::{PageSlot, SlotState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use strata_common::{CacheConfig, PageId, Result, RetryStatus, StrataError};
use tracing::{debug, trace};

/// Persistent home for pages that are not resident.
pub trait BackingStore<P>: Send + Sync {
    /// Reads the page stored at `addr`.
    fn read(&self, addr: PageId) -> Result<Arc<P>>;

    /// Writes an evicted page back to `addr`.
    fn write(&self, addr: PageId, page: Arc<P>) -> Result<()>;
}

/// Observer invoked at the start of every pin attempt.
///
/// Used to inject writer activity at a precise point of a reader's descent.
pub trait CacheEventListener<P>: Send + Sync {
    fn on_page_in(&self, slot: &PageSlot<P>);
}

/// Page cache.
///
/// Manages page residency for a tree with:
/// - Pin counting for lock-free readers
/// - Hand-over-hand `page_swap` for root-to-leaf descent
/// - Reads from a backing store for non-resident pages
/// - Eviction of unpinned pages
pub struct PageCache<P> {
    /// Configuration.
    config: CacheConfig,
    /// Where non-resident pages live.
    store: Arc<dyn BackingStore<P>>,
    /// Optional pin-attempt observer.
    listener: RwLock<Option<Arc<dyn CacheEventListener<P>>>>,
    /// Number of resident pages.
    resident: AtomicUsize,
    /// Pins currently held across all slots.
    pinned: AtomicU64,
    /// Pages read from the backing store.
    reads: AtomicU64,
    /// Pages evicted to the backing store.
    evictions: AtomicU64,
    /// Pin attempts that observed a split slot.
    restarts: AtomicU64,
}

impl<P: Send + Sync> PageCache<P> {
    /// Creates a new page cache over `store`.
    pub fn new(config: CacheConfig, store: Arc<dyn BackingStore<P>>) -> Self {
        Self {
            config,
            store,
            listener: RwLock::new(None),
            resident: AtomicUsize::new(0),
            pinned: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn BackingStore<P>> {
        &self.store
    }

    /// Installs or clears the pin-attempt observer.
    pub fn set_listener(&self, listener: Option<Arc<dyn CacheEventListener<P>>>) {
        *self.listener.write() = listener;
    }

    /// Creates a slot for a page that is already in memory.
    pub fn new_resident_slot(&self, addr: Option<PageId>, page: Arc<P>) -> PageSlot<P> {
        self.resident.fetch_add(1, Ordering::Relaxed);
        PageSlot::resident(addr, page)
    }

    /// Creates a slot for a page that lives in the backing store.
    pub fn new_disk_slot(&self, addr: PageId) -> PageSlot<P> {
        PageSlot::on_disk(addr)
    }

    /// Pins the page behind `slot`, reading it in if necessary.
    ///
    /// Returns `Restart` if the slot was split out of its parent; the
    /// caller holds nothing new in that case.
    pub fn page_in(&self, slot: &PageSlot<P>) -> Result<RetryStatus> {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_page_in(slot);
        }

        loop {
            match slot.state() {
                SlotState::Mem => {
                    slot.pin();
                    if slot.state() == SlotState::Mem {
                        self.pinned.fetch_add(1, Ordering::Relaxed);
                        return Ok(RetryStatus::Complete);
                    }
                    // Lost a race with eviction or a split, back off and look again.
                    slot.unpin();
                }
                SlotState::Disk => {
                    if slot.transition(SlotState::Disk, SlotState::Reading) {
                        self.read_in(slot)?;
                    }
                }
                SlotState::Reading | SlotState::Locked => std::thread::yield_now(),
                SlotState::Split => {
                    self.restarts.fetch_add(1, Ordering::Relaxed);
                    trace!(addr = ?slot.addr(), "page-in observed split slot");
                    return Ok(RetryStatus::Restart);
                }
            }
        }
    }

    /// Reads a claimed slot's page from the backing store and publishes it.
    fn read_in(&self, slot: &PageSlot<P>) -> Result<()> {
        let read = match slot.addr() {
            Some(addr) => self.store.read(addr),
            None => Err(StrataError::ReadFailed(
                "non-resident page has no address".to_string(),
            )),
        };
        match read {
            Ok(page) => {
                slot.install(page);
                self.resident.fetch_add(1, Ordering::Relaxed);
                self.reads.fetch_add(1, Ordering::Relaxed);
                trace!(addr = ?slot.addr(), "page read in");
                slot.set_state(SlotState::Mem);
                Ok(())
            }
            Err(e) => {
                slot.set_state(SlotState::Disk);
                Err(e)
            }
        }
    }

    /// Releases `held` and pins `want`.
    ///
    /// On `Restart` the caller still holds `held`. On error `held` has
    /// been released and the caller holds nothing. A `held` of `None`
    /// stands for the tree root, which is never released.
    pub fn page_swap(
        &self,
        held: Option<&PageSlot<P>>,
        want: &PageSlot<P>,
    ) -> Result<RetryStatus> {
        match self.page_in(want) {
            Ok(RetryStatus::Complete) => {
                if let Some(held) = held {
                    self.page_release(held);
                }
                Ok(RetryStatus::Complete)
            }
            Ok(RetryStatus::Restart) => Ok(RetryStatus::Restart),
            Err(e) => {
                if let Some(held) = held {
                    self.page_release(held);
                }
                Err(e)
            }
        }
    }

    /// Drops one pin on `slot`.
    #[inline]
    pub fn page_release(&self, slot: &PageSlot<P>) {
        slot.unpin();
        self.pinned.fetch_sub(1, Ordering::Relaxed);
    }

    /// Evicts the page behind `slot` to the backing store.
    ///
    /// Returns false if the page is pinned, not resident, or split.
    pub fn evict(&self, slot: &PageSlot<P>) -> Result<bool> {
        if !slot.transition(SlotState::Mem, SlotState::Locked) {
            return Ok(false);
        }
        if slot.is_pinned() {
            slot.set_state(SlotState::Mem);
            return Ok(false);
        }
        let Some(addr) = slot.addr() else {
            slot.set_state(SlotState::Mem);
            return Err(StrataError::Internal(
                "cannot evict a page without an address".to_string(),
            ));
        };
        let Some(page) = slot.take_page() else {
            slot.set_state(SlotState::Mem);
            return Ok(false);
        };
        if let Err(e) = self.store.write(addr, Arc::clone(&page)) {
            slot.install(page);
            slot.set_state(SlotState::Mem);
            return Err(e);
        }

        slot.set_state(SlotState::Disk);
        self.resident.fetch_sub(1, Ordering::Relaxed);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(%addr, "page evicted");
        Ok(true)
    }

    /// Marks `slot` as split: every later pin attempt restarts.
    ///
    /// The page stays reachable through the slot for readers that already
    /// hold a pin, but it no longer counts as resident.
    pub fn mark_split(&self, slot: &PageSlot<P>) {
        if slot.swap_state(SlotState::Split) == SlotState::Mem {
            self.resident.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Returns statistics about the cache.
    pub fn stats(&self) -> CacheStats {
        let resident_pages = self.resident.load(Ordering::Relaxed);
        CacheStats {
            resident_pages,
            pinned: self.pinned.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            over_limit: resident_pages > self.config.resident_page_limit,
        }
    }
}

/// Statistics about the page cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of resident pages.
    pub resident_pages: usize,
    /// Pins currently held.
    pub pinned: u64,
    /// Pages read from the backing store.
    pub reads: u64,
    /// Pages evicted.
    pub evictions: u64,
    /// Pin attempts that had to restart.
    pub restarts: u64,
    /// Whether the resident page count exceeds the configured limit.
    pub over_limit: bool,
}

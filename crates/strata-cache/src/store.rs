//! In-memory backing store for evicted pages.

use crate::cache::BackingStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::{PageId, Result, StrataError};

/// In-memory page storage.
///
/// Evicted pages are kept by address and handed back on the next read,
/// so eviction never loses in-memory modifications.
pub struct InMemoryPageStore<P> {
    pages: Mutex<HashMap<PageId, Arc<P>>>,
    reads: AtomicU64,
}

impl<P> InMemoryPageStore<P> {
    /// Creates a new empty page store.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            reads: AtomicU64::new(0),
        }
    }

    /// Returns the number of stored pages.
    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    /// Returns true if no pages are stored.
    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }

    /// Returns the number of successful reads served.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns true if a page image exists at `addr`.
    pub fn contains(&self, addr: PageId) -> bool {
        self.pages.lock().contains_key(&addr)
    }
}

impl<P> Default for InMemoryPageStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Send + Sync> BackingStore<P> for InMemoryPageStore<P> {
    fn read(&self, addr: PageId) -> Result<Arc<P>> {
        let page = self
            .pages
            .lock()
            .get(&addr)
            .cloned()
            .ok_or(StrataError::PageNotFound {
                page_id: addr.as_u64(),
            })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(page)
    }

    fn write(&self, addr: PageId, page: Arc<P>) -> Result<()> {
        self.pages.lock().insert(addr, page);
        Ok(())
    }
}

//! Child references.
//!
//! A `Ref` is the parent's handle on a child page: the child's cache slot,
//! the first record number the child covers, a weak pointer to the page
//! whose index currently holds the ref, and a hint of the ref's position
//! in that index. Splits rewrite `home` and the hint while readers run, so
//! both are advisory for anyone not holding the tree's split lock.

use crate::page::Page;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use strata_cache::PageSlot;
use strata_common::{PageId, Recno};

pub struct Ref {
    slot: PageSlot<Page>,
    home: RwLock<Weak<Page>>,
    recno: Recno,
    pindex_hint: AtomicU32,
}

impl Ref {
    /// Creates a ref with no home.
    pub(crate) fn new(slot: PageSlot<Page>, recno: Recno) -> Self {
        Self {
            slot,
            home: RwLock::new(Weak::new()),
            recno,
            pindex_hint: AtomicU32::new(0),
        }
    }

    /// Returns the child's cache slot.
    #[inline]
    pub fn slot(&self) -> &PageSlot<Page> {
        &self.slot
    }

    /// Returns the child's page address.
    #[inline]
    pub fn addr(&self) -> Option<PageId> {
        self.slot.addr()
    }

    /// Returns the resident page, if any.
    #[inline]
    pub fn page(&self) -> Option<Arc<Page>> {
        self.slot.page()
    }

    /// Returns the starting record number of the child.
    #[inline]
    pub fn recno(&self) -> Recno {
        self.recno
    }

    /// Returns the page whose index holds this ref. The root has none.
    pub fn home(&self) -> Option<Arc<Page>> {
        self.home.read().upgrade()
    }

    pub(crate) fn set_home(&self, home: &Arc<Page>) {
        *self.home.write() = Arc::downgrade(home);
    }

    /// Returns the last known position of this ref in its home's index.
    #[inline]
    pub fn pindex_hint(&self) -> u32 {
        self.pindex_hint.load(Ordering::Relaxed)
    }

    /// Updates the position hint. A wrong hint only costs lookups a
    /// fallback path.
    pub fn set_pindex_hint(&self, hint: usize) {
        self.pindex_hint
            .store(u32::try_from(hint).unwrap_or(u32::MAX), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("addr", &self.slot.addr())
            .field("recno", &self.recno)
            .field("state", &self.slot.state())
            .field("pindex_hint", &self.pindex_hint())
            .field("has_home", &self.home().is_some())
            .finish()
    }
}

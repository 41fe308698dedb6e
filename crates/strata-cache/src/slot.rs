//! Page slot management.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use strata_common::PageId;

/// Lifecycle state of a page slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Page is not resident; it must be read from the backing store.
    Disk = 0,
    /// A thread is reading the page in.
    Reading = 1,
    /// Page is resident and may be pinned.
    Mem = 2,
    /// Page is being evicted.
    Locked = 3,
    /// The slot was replaced in its parent; searchers must restart.
    Split = 4,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Disk,
            1 => SlotState::Reading,
            2 => SlotState::Mem,
            3 => SlotState::Locked,
            _ => SlotState::Split,
        }
    }
}

/// The cache's view of one page reference.
///
/// Each slot contains:
/// - The resident page, when there is one
/// - The page's address in the backing store
/// - A state word and a pin count
///
/// A reader pins first and validates the state second; an evictor locks
/// the state first and checks the pin count second. Both sides use
/// sequentially consistent operations so one of them always sees the other.
pub struct PageSlot<P> {
    /// Backing-store address, if the page has one.
    addr: Option<PageId>,
    /// Current state (a `SlotState` discriminant).
    state: AtomicU8,
    /// The resident page.
    page: RwLock<Option<Arc<P>>>,
    /// Number of readers currently holding this page.
    pin_count: AtomicU32,
}

impl<P> PageSlot<P> {
    /// Creates a slot whose page is already resident.
    pub(crate) fn resident(addr: Option<PageId>, page: Arc<P>) -> Self {
        Self {
            addr,
            state: AtomicU8::new(SlotState::Mem as u8),
            page: RwLock::new(Some(page)),
            pin_count: AtomicU32::new(0),
        }
    }

    /// Creates a slot whose page lives in the backing store.
    pub(crate) fn on_disk(addr: PageId) -> Self {
        Self {
            addr: Some(addr),
            state: AtomicU8::new(SlotState::Disk as u8),
            page: RwLock::new(None),
            pin_count: AtomicU32::new(0),
        }
    }

    /// Returns the backing-store address.
    #[inline]
    pub fn addr(&self) -> Option<PageId> {
        self.addr
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Stores `state` and returns the previous state.
    #[inline]
    pub(crate) fn swap_state(&self, state: SlotState) -> SlotState {
        SlotState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    /// Atomically moves the slot from `from` to `to`.
    #[inline]
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns the resident page, if any.
    ///
    /// Only meaningful while the caller holds a pin.
    #[inline]
    pub fn page(&self) -> Option<Arc<P>> {
        self.page.read().clone()
    }

    pub(crate) fn install(&self, page: Arc<P>) {
        *self.page.write() = Some(page);
    }

    pub(crate) fn take_page(&self) -> Option<Arc<P>> {
        self.page.write().take()
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    /// Returns true if this slot is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the pin count and returns the new count.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            // Underflow protection: restore to 0
            self.pin_count.store(0, Ordering::SeqCst);
            return 0;
        }
        prev - 1
    }
}

impl<P> std::fmt::Debug for PageSlot<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSlot")
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("pin_count", &self.pin_count())
            .finish()
    }
}

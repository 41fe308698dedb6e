//! Page cache for Strata column-store trees.
//!
//! This crate provides the pinning layer the tree search runs against:
//! - Page slots with a state machine (on disk, reading, in memory, locked, split)
//! - Pin counting for lock-free readers
//! - `page_swap` / `page_release` for hand-over-hand descent
//! - Eviction of unpinned pages to a backing store
//! - An in-memory backing store

mod cache;
mod slot;
mod store;

pub use cache::{BackingStore, CacheEventListener, CacheStats, PageCache};
pub use slot::{PageSlot, SlotState};
pub use store::InMemoryPageStore;

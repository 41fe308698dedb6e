//! Column-store tree handle.

use crate::cursor::CursorBTree;
use crate::insert::Update;
use crate::page::{Page, PageKind};
use crate::reference::Ref;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use strata_cache::{CacheStats, PageCache, PageSlot};
use strata_common::{PageId, Recno, Result, StrataError, TreeConfig};
use tracing::trace;

/// A column-store B+tree keyed by record number.
///
/// The root is always resident and never pinned. Every other page is
/// reached through a `Ref` in its parent's index and pinned through the
/// page cache while a cursor references it.
pub struct ColumnTree {
    pub(crate) config: TreeConfig,
    pub(crate) cache: PageCache<Page>,
    pub(crate) root: Arc<Ref>,
    file_id: u32,
    next_page: AtomicU32,
    /// Largest record number allocated so far.
    pub(crate) last_recno: AtomicU64,
    /// Serializes structural changes.
    pub(crate) split_lock: Mutex<()>,
    pub(crate) counters: TreeCounters,
}

#[derive(Default)]
pub(crate) struct TreeCounters {
    pub(crate) searches: AtomicU64,
    pub(crate) root_restarts: AtomicU64,
    pub(crate) page_restarts: AtomicU64,
    pub(crate) insert_restarts: AtomicU64,
    pub(crate) maximum_depth: AtomicU32,
}

/// Statistics about a tree.
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    /// Searches started.
    pub searches: u64,
    /// Descents restarted from the root after an internal split.
    pub root_restarts: u64,
    /// Child pin attempts retried against a fresh index snapshot.
    pub page_restarts: u64,
    /// Inserts retried because the search stack went stale.
    pub insert_restarts: u64,
    /// Deepest level reached by a descent; the root is level 1.
    pub maximum_depth: u32,
    /// Page cache statistics.
    pub cache: CacheStats,
}

impl ColumnTree {
    pub(crate) fn new(
        config: TreeConfig,
        cache: PageCache<Page>,
        root: Arc<Ref>,
        file_id: u32,
        next_page: u32,
        last_recno: Recno,
    ) -> Self {
        Self {
            config,
            cache,
            root,
            file_id,
            next_page: AtomicU32::new(next_page),
            last_recno: AtomicU64::new(last_recno),
            split_lock: Mutex::new(()),
            counters: TreeCounters::default(),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Returns the page cache.
    pub fn cache(&self) -> &PageCache<Page> {
        &self.cache
    }

    /// Returns the root ref.
    pub fn root(&self) -> &Arc<Ref> {
        &self.root
    }

    /// Returns true if `r` is the tree's root.
    #[inline]
    pub fn is_root(&self, r: &Ref) -> bool {
        std::ptr::eq(r, Arc::as_ptr(&self.root))
    }

    /// Returns the largest record number allocated so far.
    pub fn last_recno(&self) -> Recno {
        self.last_recno.load(Ordering::Acquire)
    }

    pub(crate) fn alloc_page_id(&self) -> PageId {
        PageId::new(self.file_id, self.next_page.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the slot to hand to `page_swap` for a held ref. The root
    /// is never pinned, so it maps to `None`.
    #[inline]
    pub(crate) fn held<'a>(&self, r: &'a Ref) -> Option<&'a PageSlot<Page>> {
        (!self.is_root(r)).then(|| r.slot())
    }

    /// Drops the pin on `r` unless it is the root.
    pub(crate) fn release_ref(&self, r: &Ref) {
        if let Some(slot) = self.held(r) {
            self.cache.page_release(slot);
        }
    }

    /// Evicts the page behind `r` to the backing store if nothing pins it.
    /// The root always stays resident.
    pub fn evict(&self, r: &Ref) -> Result<bool> {
        if self.is_root(r) {
            return Ok(false);
        }
        self.cache.evict(r.slot())
    }

    /// Releases the cursor's page and clears its position.
    pub fn release(&self, cbt: &mut CursorBTree) {
        if let Some(r) = cbt.page_ref.take() {
            self.release_ref(&r);
        }
        cbt.clear();
    }

    /// Returns the visible value of `recno`.
    pub fn get(&self, recno: Recno) -> Result<Option<Bytes>> {
        let mut cbt = CursorBTree::new();
        self.search(recno, None, &mut cbt)?;
        let value = self.cursor_value(&cbt);
        self.release(&mut cbt);
        value
    }

    /// Resolves the value at a positioned cursor.
    pub fn cursor_value(&self, cbt: &CursorBTree) -> Result<Option<Bytes>> {
        if cbt.compare != 0 {
            return Ok(None);
        }
        if let Some(ins) = cbt.ins() {
            return Ok(match ins.latest() {
                Some(Update::Value(value)) => Some(value),
                Some(Update::Deleted) | None => None,
            });
        }

        let page = cbt
            .page_ref()
            .and_then(|r| r.page())
            .ok_or_else(|| StrataError::Internal("cursor has no resident page".to_string()))?;
        match page.kind() {
            PageKind::ColFixed(fix) => Ok(fix
                .value(cbt.slot)
                .map(|v| Bytes::copy_from_slice(&[v]))),
            PageKind::ColVariable(var) => Ok(var.cell(cbt.slot).and_then(|c| c.value.clone())),
            PageKind::ColInternal(_) => Err(StrataError::InvalidPageType),
        }
    }

    pub(crate) fn note_depth(&self, depth: u32) {
        let prev = self.counters.maximum_depth.fetch_max(depth, Ordering::Relaxed);
        if depth > prev {
            trace!(depth, "new maximum tree depth");
        }
    }

    /// Returns statistics about the tree and its cache.
    pub fn stats(&self) -> TreeStats {
        let c = &self.counters;
        TreeStats {
            searches: c.searches.load(Ordering::Relaxed),
            root_restarts: c.root_restarts.load(Ordering::Relaxed),
            page_restarts: c.page_restarts.load(Ordering::Relaxed),
            insert_restarts: c.insert_restarts.load(Ordering::Relaxed),
            maximum_depth: c.maximum_depth.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }
}

impl std::fmt::Debug for ColumnTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnTree")
            .field("root", &self.root)
            .field("last_recno", &self.last_recno())
            .finish()
    }
}

//! Record-number search.
//!
//! A search positions a cursor at the record with a given number, or at
//! the place that record would occupy. Descent runs hand over hand from
//! the root: each child is pinned before its parent is released, so an
//! evictor can never free a page under the reader. The descent takes no
//! locks; it detects concurrent splits and restarts instead.

use crate::cursor::CursorBTree;
use crate::insert::InsertHead;
use crate::page::{PageIndex, PageKind};
use crate::reference::Ref;
use crate::split::split_intl_race;
use crate::tree::ColumnTree;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use strata_common::{RECNO_ALLOCATE, RECNO_OOB, Recno, Result, RetryStatus, StrataError, recno_sign};
use tracing::{debug, trace};

/// Checks whether `recno` belongs to the pinned leaf `leaf`.
///
/// Sets `cbt.compare` to +1 when `recno` sorts before the leaf, -1 when
/// it sorts at or after the next leaf in the parent, and 0 otherwise. The
/// check trusts `leaf.pindex_hint` only when the index entry it names is
/// `leaf` itself; a stale hint results in 0 and the caller searches the
/// leaf.
pub fn check_leaf_key_range(recno: Recno, leaf: &Arc<Ref>, cbt: &mut CursorBTree) {
    cbt.compare = 0;

    if recno < leaf.recno() {
        cbt.compare = 1;
        return;
    }

    let Some(home) = leaf.home() else {
        return;
    };
    let Some(intl) = home.as_internal() else {
        return;
    };
    let pindex = intl.index();
    let indx = leaf.pindex_hint() as usize;
    if let (Some(at), Some(next)) = (pindex.get(indx), pindex.get(indx + 1)) {
        if Arc::ptr_eq(at, leaf) && recno >= next.recno() {
            cbt.compare = -1;
        }
    }
}

impl ColumnTree {
    /// Positions `cbt` at `recno`.
    ///
    /// With `leaf` set, the caller holds a pin on that leaf and the search
    /// stays on it. A record outside the leaf's range is reported through
    /// `compare` with `slot` 0, leaving the caller to search from the root.
    /// Otherwise the search descends from the root and the cursor ends up
    /// holding a pin on the leaf it returns. A descent that fails leaves the
    /// cursor without a page.
    ///
    /// `RECNO_ALLOCATE` searches for the append position past every record.
    pub fn search(
        &self,
        recno: Recno,
        leaf: Option<&Arc<Ref>>,
        cbt: &mut CursorBTree,
    ) -> Result<()> {
        if recno == RECNO_OOB {
            return Err(StrataError::RecordOutOfRange { recno });
        }
        self.counters.searches.fetch_add(1, Ordering::Relaxed);

        // Any pin the cursor holds on a page other than `leaf` is dropped.
        if let Some(held) = cbt.page_ref.take() {
            if !leaf.is_some_and(|leaf| Arc::ptr_eq(leaf, &held)) {
                self.release_ref(&held);
            }
        }
        cbt.clear();

        let current = match leaf {
            Some(leaf) => {
                if leaf.home().is_some() {
                    check_leaf_key_range(recno, leaf, cbt);
                    if cbt.compare != 0 {
                        cbt.page_ref = Some(Arc::clone(leaf));
                        cbt.slot = 0;
                        return Ok(());
                    }
                }
                Arc::clone(leaf)
            }
            None => self.descend(recno)?,
        };

        let result = self.search_leaf(recno, &current, cbt);
        match &result {
            Err(_) if leaf.is_none() => self.release_ref(&current),
            _ => cbt.page_ref = Some(current),
        }
        result
    }

    /// Descends from the root to the leaf covering `recno` and returns it
    /// pinned (unless the root is itself the leaf).
    fn descend(&self, recno: Recno) -> Result<Arc<Ref>> {
        'restart_root: loop {
            let mut current = Arc::clone(&self.root);
            let mut parent_pindex: Option<Arc<PageIndex>> = None;
            let mut depth = 1u32;

            loop {
                let page = match current.page() {
                    Some(page) => page,
                    None => {
                        self.release_ref(&current);
                        return Err(StrataError::Internal(format!(
                            "pinned page {:?} is not resident",
                            current.addr()
                        )));
                    }
                };
                let PageKind::ColInternal(intl) = page.kind() else {
                    break;
                };
                debug_assert_eq!(current.recno(), intl.recno());

                // A page-level restart re-reads the index and retries the
                // child; the current page stays pinned.
                'restart_page: loop {
                    let pindex = intl.index();
                    let entries = pindex.entries();
                    let Some(last) = pindex.refs().last() else {
                        self.release_ref(&current);
                        return Err(StrataError::BTreeCorrupted(format!(
                            "internal page {} has an empty index",
                            page.id()
                        )));
                    };

                    let descent = if recno >= last.recno() {
                        // The right edge of a page that split under us may
                        // no longer cover every larger record; the parent
                        // snapshot changing is the signal.
                        if let Some(saved) = parent_pindex.as_ref() {
                            let raced = current
                                .home()
                                .is_some_and(|home| split_intl_race(&home, saved));
                            if raced {
                                self.release_ref(&current);
                                self.counters.root_restarts.fetch_add(1, Ordering::Relaxed);
                                debug!(recno, page = %page.id(), "split race, restarting from root");
                                continue 'restart_root;
                            }
                        }
                        Arc::clone(last)
                    } else {
                        let mut base = 0usize;
                        let mut limit = entries - 1;
                        let mut exact = None;
                        while limit != 0 {
                            let indx = base + (limit >> 1);
                            let r = &pindex.refs()[indx];
                            if recno == r.recno() {
                                exact = Some(indx);
                                break;
                            }
                            if recno > r.recno() {
                                base = indx + 1;
                                limit -= 1;
                            }
                            limit >>= 1;
                        }
                        let chosen = exact.unwrap_or_else(|| {
                            debug_assert!(base > 0);
                            base.saturating_sub(1)
                        });
                        let child = Arc::clone(&pindex.refs()[chosen]);
                        debug_assert!(child.recno() <= recno);
                        debug_assert!(
                            pindex
                                .refs()
                                .get(chosen + 1)
                                .is_none_or(|next| recno < next.recno())
                        );
                        child
                    };

                    match self.cache.page_swap(self.held(&current), descent.slot())? {
                        RetryStatus::Complete => {
                            trace!(recno, depth, child = ?descent.addr(), "descended");
                            parent_pindex = Some(pindex);
                            current = descent;
                            depth += 1;
                            break 'restart_page;
                        }
                        RetryStatus::Restart => {
                            self.counters.page_restarts.fetch_add(1, Ordering::Relaxed);
                            debug!(recno, child = ?descent.addr(), "child split, re-reading index");
                            continue 'restart_page;
                        }
                    }
                }
            }

            self.note_depth(depth);
            return Ok(current);
        }
    }

    /// Positions `cbt` on the leaf `current`.
    fn search_leaf(&self, recno: Recno, current: &Arc<Ref>, cbt: &mut CursorBTree) -> Result<()> {
        let page = current.page().ok_or_else(|| {
            StrataError::Internal(format!("leaf {:?} is not resident", current.addr()))
        })?;

        cbt.recno = recno;
        cbt.compare = 0;

        let ins_head = match page.kind() {
            PageKind::ColFixed(fix) => {
                if recno < fix.recno() {
                    cbt.compare = 1;
                    return Ok(());
                }
                let end = fix.recno() + u64::from(fix.entries());
                if recno >= end {
                    cbt.recno = end;
                    self.search_append(recno, fix.append(), cbt);
                    return Ok(());
                }
                cbt.slot = (recno - fix.recno()) as u32;
                Some(fix.update_head())
            }
            PageKind::ColVariable(var) => {
                if recno < var.recno() {
                    cbt.compare = 1;
                    return Ok(());
                }
                match var.search(recno) {
                    None => {
                        cbt.recno = var.last_recno();
                        self.search_append(recno, var.append(), cbt);
                        return Ok(());
                    }
                    Some(slot) => {
                        cbt.slot = slot;
                        var.update_head(slot)
                    }
                }
            }
            PageKind::ColInternal(_) => {
                return Err(StrataError::BTreeCorrupted(format!(
                    "search for {recno} ended on internal page {}",
                    page.id()
                )));
            }
        };

        // An on-page record may have newer updates; only an exact match
        // positions the cursor in the update list.
        if let Some(head) = ins_head {
            if let Some(ins) = head.search(&mut cbt.stack, recno) {
                if ins.recno() == recno {
                    cbt.ins_head = Some(Arc::clone(head));
                    cbt.ins = Some(ins);
                }
            }
        }
        Ok(())
    }

    /// Positions `cbt` in a leaf's append list.
    fn search_append(&self, recno: Recno, append: &Arc<InsertHead>, cbt: &mut CursorBTree) {
        cbt.ins_head = Some(Arc::clone(append));

        // The allocation sentinel always lands after the last entry.
        cbt.ins = if recno == RECNO_ALLOCATE {
            None
        } else {
            append.search(&mut cbt.stack, recno)
        };

        cbt.compare = match &cbt.ins {
            None => -1,
            Some(ins) => {
                cbt.recno = ins.recno();
                recno_sign(ins.recno(), recno)
            }
        };
        if cbt.compare == -1 {
            cbt.set_max_record();
        }
    }
}

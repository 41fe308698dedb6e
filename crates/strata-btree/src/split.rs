//! Copy-on-write restructuring of internal pages.
//!
//! Writers never modify an index in place. They build a new `PageIndex`
//! and publish it; readers holding the previous snapshot keep a
//! consistent, if stale, view. Publishing order is what makes the
//! descent's race check sufficient: a parent always learns about a new
//! page before the page it was split from forgets its children.

use crate::page::{ColInternal, Page, PageIndex};
use crate::reference::Ref;
use crate::tree::ColumnTree;
use std::sync::Arc;
use strata_common::{Result, RetryStatus, StrataError};
use tracing::debug;

/// Returns true if `home`'s index is no longer the snapshot `saved`.
///
/// A descent that took the right-most child of a page uses this to learn
/// that the page may have split since its parent's index was read.
pub fn split_intl_race(home: &Page, saved: &Arc<PageIndex>) -> bool {
    match home.as_internal() {
        Some(intl) => !Arc::ptr_eq(&intl.index(), saved),
        None => true,
    }
}

impl ColumnTree {
    /// Splits the internal page behind `child`, moving its children from
    /// position `at` onward into a new sibling.
    ///
    /// Returns the new sibling's ref. The root cannot be split this way.
    pub fn split_internal(&self, child: &Arc<Ref>, at: usize) -> Result<Arc<Ref>> {
        let _guard = self.split_lock.lock();

        if self.is_root(child) {
            return Err(StrataError::InvalidParameter {
                name: "child".to_string(),
                value: "root".to_string(),
            });
        }
        let parent = child
            .home()
            .ok_or_else(|| StrataError::BTreeCorrupted("split child has no parent".to_string()))?;
        let parent_intl = parent.as_internal().ok_or(StrataError::InvalidPageType)?;

        if self.cache.page_in(child.slot())? == RetryStatus::Restart {
            return Err(StrataError::BTreeCorrupted(
                "split child was already replaced".to_string(),
            ));
        }
        let result = self.split_pinned(&parent, parent_intl, child, at);
        self.cache.page_release(child.slot());
        result
    }

    fn split_pinned(
        &self,
        parent: &Arc<Page>,
        parent_intl: &ColInternal,
        child: &Arc<Ref>,
        at: usize,
    ) -> Result<Arc<Ref>> {
        let page = child
            .page()
            .ok_or_else(|| StrataError::Internal("pinned split child is not resident".to_string()))?;
        let intl = page.as_internal().ok_or(StrataError::InvalidPageType)?;
        let pindex = intl.index();
        if at == 0 || at >= pindex.entries() {
            return Err(StrataError::InvalidParameter {
                name: "at".to_string(),
                value: at.to_string(),
            });
        }

        let parent_index = parent_intl.index();
        let pos = parent_index.position(child).ok_or_else(|| {
            StrataError::BTreeCorrupted("split child missing from its parent".to_string())
        })?;

        // Build the sibling and move the children into it.
        let moved = pindex.refs()[at..].to_vec();
        let start = moved[0].recno();
        let id = self.alloc_page_id();
        let sibling = Arc::new(Page::internal(id, start, moved.clone()));
        for (indx, r) in moved.iter().enumerate() {
            r.set_home(&sibling);
            r.set_pindex_hint(indx);
        }
        let sibling_ref = Arc::new(Ref::new(
            self.cache.new_resident_slot(Some(id), Arc::clone(&sibling)),
            start,
        ));
        sibling_ref.set_home(parent);

        // Parent first.
        let mut refs = parent_index.refs().to_vec();
        refs.insert(pos + 1, Arc::clone(&sibling_ref));
        for (indx, r) in refs.iter().enumerate().skip(pos + 1) {
            r.set_pindex_hint(indx);
        }
        parent_intl.publish_index(Arc::new(PageIndex::new(refs)));

        // Then the split page.
        intl.publish_index(Arc::new(PageIndex::new(pindex.refs()[..at].to_vec())));

        debug!(
            page = %page.id(),
            sibling = %id,
            moved = pindex.entries() - at,
            "internal page split"
        );
        Ok(sibling_ref)
    }

    /// Replaces `old` in its parent with a fresh ref to the same page and
    /// marks `old` split, so pins through it restart.
    ///
    /// Returns the replacement.
    pub fn replace_ref(&self, old: &Arc<Ref>) -> Result<Arc<Ref>> {
        let _guard = self.split_lock.lock();

        let parent = old
            .home()
            .ok_or_else(|| StrataError::BTreeCorrupted("replaced ref has no parent".to_string()))?;
        let parent_intl = parent.as_internal().ok_or(StrataError::InvalidPageType)?;
        let parent_index = parent_intl.index();
        let pos = parent_index.position(old).ok_or_else(|| {
            StrataError::BTreeCorrupted("replaced ref missing from its parent".to_string())
        })?;

        let slot = match (old.page(), old.addr()) {
            (Some(page), addr) => self.cache.new_resident_slot(addr, page),
            (None, Some(addr)) => self.cache.new_disk_slot(addr),
            (None, None) => {
                return Err(StrataError::Internal(
                    "replaced ref has neither page nor address".to_string(),
                ));
            }
        };
        let replacement = Arc::new(Ref::new(slot, old.recno()));
        replacement.set_home(&parent);
        replacement.set_pindex_hint(pos);

        let mut refs = parent_index.refs().to_vec();
        refs[pos] = Arc::clone(&replacement);
        parent_intl.publish_index(Arc::new(PageIndex::new(refs)));
        self.cache.mark_split(old.slot());

        debug!(addr = ?old.addr(), pos, "child ref replaced");
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TreeBuilder;
    use strata_common::TreeConfig;

    fn three_level_tree() -> ColumnTree {
        let config = TreeConfig {
            internal_fanout: 4,
            leaf_max_entries: 10,
            ..TreeConfig::default()
        };
        // 16 leaves, 4 internal pages, 1 root.
        TreeBuilder::new(config)
            .fixed_records(&[1; 160])
            .build()
            .unwrap()
    }

    fn root_index(tree: &ColumnTree) -> Arc<PageIndex> {
        tree.root().page().unwrap().as_internal().unwrap().index()
    }

    #[test]
    fn test_race_detects_new_index() {
        let tree = three_level_tree();
        let root = tree.root().page().unwrap();
        let saved = root_index(&tree);
        assert!(!split_intl_race(&root, &saved));

        let child = Arc::clone(saved.get(1).unwrap());
        tree.split_internal(&child, 2).unwrap();
        assert!(split_intl_race(&root, &saved));
    }

    #[test]
    fn test_split_internal_moves_children() {
        let tree = three_level_tree();
        let child = Arc::clone(root_index(&tree).get(1).unwrap());
        let sibling = tree.split_internal(&child, 2).unwrap();

        let index = root_index(&tree);
        assert_eq!(index.entries(), 5);
        assert!(Arc::ptr_eq(index.get(2).unwrap(), &sibling));
        assert_eq!(sibling.recno(), 61);
        assert_eq!(sibling.pindex_hint(), 2);
        assert_eq!(index.get(3).unwrap().pindex_hint(), 3);

        let left = child.page().unwrap();
        assert_eq!(left.as_internal().unwrap().index().entries(), 2);
        let right = sibling.page().unwrap();
        let moved = right.as_internal().unwrap().index();
        assert_eq!(moved.entries(), 2);
        for (indx, r) in moved.refs().iter().enumerate() {
            assert!(Arc::ptr_eq(&r.home().unwrap(), &right));
            assert_eq!(r.pindex_hint() as usize, indx);
        }
        assert_eq!(child.slot().pin_count(), 0);

        for recno in [41, 60, 61, 80, 81, 160] {
            assert_eq!(tree.get(recno).unwrap().as_deref(), Some(&[1u8][..]));
        }
    }

    #[test]
    fn test_split_rejects_bad_position() {
        let tree = three_level_tree();
        let child = Arc::clone(root_index(&tree).get(0).unwrap());

        assert!(matches!(
            tree.split_internal(&child, 0),
            Err(StrataError::InvalidParameter { .. })
        ));
        assert!(matches!(
            tree.split_internal(&child, 4),
            Err(StrataError::InvalidParameter { .. })
        ));
        assert!(matches!(
            tree.split_internal(tree.root(), 1),
            Err(StrataError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_replace_ref() {
        let tree = three_level_tree();
        let old = Arc::clone(root_index(&tree).get(3).unwrap());
        let replacement = tree.replace_ref(&old).unwrap();

        assert!(Arc::ptr_eq(root_index(&tree).get(3).unwrap(), &replacement));
        assert!(Arc::ptr_eq(&old.page().unwrap(), &replacement.page().unwrap()));
        assert_eq!(tree.cache().page_in(old.slot()).unwrap(), RetryStatus::Restart);
        assert_eq!(tree.get(150).unwrap().as_deref(), Some(&[1u8][..]));

        // A replaced ref cannot be split again.
        assert!(tree.split_internal(&old, 1).is_err());
    }
}

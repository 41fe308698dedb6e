//! Record modification: updates, removals and appends.

use crate::cursor::CursorBTree;
use crate::insert::{InsertEntry, InsertHead, Update, choose_depth};
use crate::page::{Page, PageKind};
use crate::tree::ColumnTree;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use strata_common::{RECNO_ALLOCATE, RECNO_OOB, Recno, Result, RetryStatus, SLOT_NONE, StrataError};
use tracing::{trace, warn};

impl ColumnTree {
    /// Sets the value of `recno`.
    pub fn update(&self, recno: Recno, value: Bytes) -> Result<()> {
        self.modify(recno, Update::Value(value))
    }

    /// Removes `recno`.
    pub fn remove(&self, recno: Recno) -> Result<()> {
        self.modify(recno, Update::Deleted)
    }

    /// Appends `value` after the last record and returns its record number.
    pub fn append(&self, value: Bytes) -> Result<Recno> {
        let mut cbt = CursorBTree::new();
        self.search(RECNO_ALLOCATE, None, &mut cbt)?;
        let result = self.append_at(&cbt, value);
        self.release(&mut cbt);
        result
    }

    fn append_at(&self, cbt: &CursorBTree, value: Bytes) -> Result<Recno> {
        let page = cursor_page(cbt)?;
        check_value(&page, &Update::Value(value.clone()))?;
        let head = cbt
            .ins_head()
            .ok_or_else(|| StrataError::Internal("append search found no append list".to_string()))?;

        let entry = head.append_serial(
            || self.last_recno.load(Ordering::Acquire) + 1,
            Update::Value(value),
            choose_depth(),
        );
        self.last_recno.fetch_max(entry.recno(), Ordering::AcqRel);
        trace!(recno = entry.recno(), "record appended");
        Ok(entry.recno())
    }

    fn modify(&self, recno: Recno, update: Update) -> Result<()> {
        if recno == RECNO_OOB || recno == RECNO_ALLOCATE {
            return Err(StrataError::RecordOutOfRange { recno });
        }

        let mut cbt = CursorBTree::new();
        let mut retries = 0u32;
        loop {
            self.search(recno, None, &mut cbt)?;
            let result = self.modify_at(&cbt, recno, &update);
            self.release(&mut cbt);
            match result? {
                RetryStatus::Complete => return Ok(()),
                RetryStatus::Restart => {
                    retries += 1;
                    self.counters.insert_restarts.fetch_add(1, Ordering::Relaxed);
                    if retries == self.config.insert_retry_warn {
                        warn!(recno, retries, "insert keeps losing races, still retrying");
                    }
                }
            }
        }
    }

    /// Applies `update` at a cursor positioned by a search for `recno`.
    fn modify_at(&self, cbt: &CursorBTree, recno: Recno, update: &Update) -> Result<RetryStatus> {
        if cbt.compare() == 1 && cbt.ins_head().is_none() {
            return Err(StrataError::RecordOutOfRange { recno });
        }
        let page = cursor_page(cbt)?;
        check_value(&page, update)?;

        // The record already has an update list entry.
        if let Some(ins) = cbt.ins() {
            if ins.recno() == recno && cbt.compare() == 0 {
                ins.push_update(update.clone());
                return Ok(RetryStatus::Complete);
            }
        }

        let appending = cbt.ins_head().is_some() && cbt.slot() == SLOT_NONE;
        // Removing a record that was never written does not extend the tree.
        if appending
            && *update == Update::Deleted
            && recno > self.last_recno.load(Ordering::Acquire)
        {
            return Err(StrataError::RecordOutOfRange { recno });
        }
        let head: Arc<InsertHead> = match (cbt.ins_head(), page.kind()) {
            (Some(head), _) => Arc::clone(head),
            (None, PageKind::ColFixed(fix)) => Arc::clone(fix.update_head()),
            (None, PageKind::ColVariable(var)) => var
                .update_head_or_init(cbt.slot())
                .cloned()
                .ok_or_else(|| StrataError::Internal(format!("slot {} out of range", cbt.slot())))?,
            (None, PageKind::ColInternal(_)) => return Err(StrataError::InvalidPageType),
        };

        let entry = InsertEntry::new(recno, update.clone(), choose_depth());
        let status = head.insert_serial(cbt.stack(), entry);
        if status == RetryStatus::Complete && appending {
            self.last_recno.fetch_max(recno, Ordering::AcqRel);
        }
        Ok(status)
    }
}

fn cursor_page(cbt: &CursorBTree) -> Result<Arc<Page>> {
    cbt.page_ref()
        .and_then(|r| r.page())
        .ok_or_else(|| StrataError::Internal("cursor has no resident page".to_string()))
}

/// Fixed-length pages only hold values that fit their bit width.
fn check_value(page: &Page, update: &Update) -> Result<()> {
    let (Some(fix), Update::Value(value)) = (page.as_fixed(), update) else {
        return Ok(());
    };
    let fits = match value.as_ref() {
        [v] => u16::from(*v) < (1u16 << fix.bit_count()),
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(StrataError::InvalidParameter {
            name: "value".to_string(),
            value: format!("{value:?} for a {}-bit page", fix.bit_count()),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::TreeBuilder;
    use crate::page::ColCell;
    use bytes::Bytes;
    use strata_common::{StrataError, TreeConfig};

    fn var_tree() -> crate::tree::ColumnTree {
        TreeBuilder::new(TreeConfig::default())
            .variable_leaf(vec![ColCell::repeated("a", 10), ColCell::new("b")])
            .variable_leaf(vec![ColCell::new("c"), ColCell::new("d")])
            .build()
            .unwrap()
    }

    #[test]
    fn test_update_on_page_record() {
        let tree = var_tree();
        tree.update(5, Bytes::from_static(b"x")).unwrap();

        assert_eq!(tree.get(5).unwrap(), Some(Bytes::from_static(b"x")));
        assert_eq!(tree.get(4).unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(tree.get(6).unwrap(), Some(Bytes::from_static(b"a")));
    }

    #[test]
    fn test_update_chain_newest_wins() {
        let tree = var_tree();
        tree.update(12, Bytes::from_static(b"1")).unwrap();
        tree.update(12, Bytes::from_static(b"2")).unwrap();

        assert_eq!(tree.get(12).unwrap(), Some(Bytes::from_static(b"2")));
        tree.remove(12).unwrap();
        assert_eq!(tree.get(12).unwrap(), None);
        assert_eq!(tree.get(13).unwrap(), Some(Bytes::from_static(b"d")));
    }

    #[test]
    fn test_update_past_end_extends_tree() {
        let tree = var_tree();
        tree.update(20, Bytes::from_static(b"far")).unwrap();

        assert_eq!(tree.last_recno(), 20);
        assert_eq!(tree.get(20).unwrap(), Some(Bytes::from_static(b"far")));
        assert_eq!(tree.get(15).unwrap(), None);
        assert_eq!(tree.append(Bytes::from_static(b"next")).unwrap(), 21);
    }

    #[test]
    fn test_remove_past_end_rejected() {
        let tree = TreeBuilder::new(TreeConfig::default())
            .fixed_records(&[1; 10])
            .build()
            .unwrap();

        assert!(matches!(
            tree.remove(1000),
            Err(StrataError::RecordOutOfRange { recno: 1000 })
        ));
        assert_eq!(tree.last_recno(), 10);
        assert_eq!(tree.append(Bytes::from_static(&[1])).unwrap(), 11);

        // Appended records can still be removed.
        tree.remove(11).unwrap();
        assert_eq!(tree.get(11).unwrap(), None);
        assert_eq!(tree.last_recno(), 11);
        assert_eq!(tree.stats().cache.pinned, 0);
    }

    #[test]
    fn test_append_allocates_consecutive_recnos() {
        let tree = var_tree();
        let first = tree.append(Bytes::from_static(b"p")).unwrap();
        let second = tree.append(Bytes::from_static(b"q")).unwrap();

        assert_eq!((first, second), (14, 15));
        assert_eq!(tree.get(15).unwrap(), Some(Bytes::from_static(b"q")));
        assert_eq!(tree.stats().cache.pinned, 0);
    }

    #[test]
    fn test_fixed_value_width_checked() {
        let config = TreeConfig {
            fixed_bit_count: 4,
            ..TreeConfig::default()
        };
        let tree = TreeBuilder::new(config)
            .fixed_records(&[1, 2, 3])
            .build()
            .unwrap();

        tree.update(2, Bytes::from_static(&[15])).unwrap();
        assert_eq!(tree.get(2).unwrap(), Some(Bytes::from_static(&[15])));
        assert!(matches!(
            tree.update(2, Bytes::from_static(&[16])),
            Err(StrataError::InvalidParameter { .. })
        ));
        assert!(matches!(
            tree.append(Bytes::from_static(b"too long")),
            Err(StrataError::InvalidParameter { .. })
        ));
        tree.remove(3).unwrap();
        assert_eq!(tree.get(3).unwrap(), None);
    }

    #[test]
    fn test_reserved_recnos_rejected() {
        let tree = var_tree();
        assert!(matches!(
            tree.update(0, Bytes::new()),
            Err(StrataError::RecordOutOfRange { recno: 0 })
        ));
        assert!(matches!(
            tree.remove(u64::MAX),
            Err(StrataError::RecordOutOfRange { .. })
        ));
    }

    #[test]
    fn test_concurrent_updates_same_slot() {
        let tree = var_tree();
        std::thread::scope(|s| {
            for t in 0..4u8 {
                let tree = &tree;
                s.spawn(move || {
                    for i in 0..50u8 {
                        tree.update(3, Bytes::copy_from_slice(&[t, i])).unwrap();
                    }
                });
            }
        });

        let value = tree.get(3).unwrap().unwrap();
        assert_eq!(value[1], 49);
        assert_eq!(tree.stats().cache.pinned, 0);
    }
}

//! Search cursor state.

use crate::insert::{InsertEntry, InsertHead, InsertLink, InsertStack};
use crate::reference::Ref;
use std::sync::Arc;
use strata_common::{RECNO_OOB, Recno, SLOT_NONE};

/// Cursor flag: the search key is past every record in the tree.
const CURSOR_MAX_RECORD: u8 = 0x01;

/// Position produced by a column-store search.
///
/// After a search:
/// - `page_ref` is the leaf the cursor points into, holding one pin
///   unless it is the root
/// - `compare` is 0 when `recno` names an existing record, +1 when the
///   records at the position are larger than the search key and -1 when
///   they are smaller
/// - `slot` is the on-page position of an on-page record, or `SLOT_NONE`
/// - `ins_head` and `ins` name the skiplist and entry holding the record
///   when it lives in an insert list
///
/// The insert stacks are scratch space for a following modification and
/// are only valid until the next search with this cursor.
#[derive(Debug, Clone)]
pub struct CursorBTree {
    pub(crate) page_ref: Option<Arc<Ref>>,
    pub(crate) recno: Recno,
    pub(crate) slot: u32,
    pub(crate) compare: i32,
    pub(crate) ins_head: Option<Arc<InsertHead>>,
    pub(crate) ins: Option<Arc<InsertEntry>>,
    pub(crate) stack: InsertStack,
    flags: u8,
}

impl CursorBTree {
    pub fn new() -> Self {
        Self {
            page_ref: None,
            recno: RECNO_OOB,
            slot: SLOT_NONE,
            compare: 0,
            ins_head: None,
            ins: None,
            stack: InsertStack::new(),
            flags: 0,
        }
    }

    /// Resets the position before a search. The page reference is left
    /// alone; releasing its pin belongs to the tree.
    pub(crate) fn clear(&mut self) {
        self.recno = RECNO_OOB;
        self.slot = SLOT_NONE;
        self.compare = 0;
        self.ins_head = None;
        self.ins = None;
        self.stack.clear();
        self.flags = 0;
    }

    /// The leaf the cursor references.
    pub fn page_ref(&self) -> Option<&Arc<Ref>> {
        self.page_ref.as_ref()
    }

    pub fn recno(&self) -> Recno {
        self.recno
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn compare(&self) -> i32 {
        self.compare
    }

    pub fn ins_head(&self) -> Option<&Arc<InsertHead>> {
        self.ins_head.as_ref()
    }

    pub fn ins(&self) -> Option<&Arc<InsertEntry>> {
        self.ins.as_ref()
    }

    pub fn ins_stack(&self) -> &[InsertLink] {
        self.stack.ins()
    }

    pub fn next_stack(&self) -> &[Option<Arc<InsertEntry>>] {
        self.stack.next()
    }

    pub(crate) fn stack(&self) -> &InsertStack {
        &self.stack
    }

    /// True when the search key is larger than every record in the tree.
    pub fn is_max_record(&self) -> bool {
        self.flags & CURSOR_MAX_RECORD != 0
    }

    pub(crate) fn set_max_record(&mut self) {
        self.flags |= CURSOR_MAX_RECORD;
    }
}

impl Default for CursorBTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cursor_is_unpositioned() {
        let cbt = CursorBTree::new();
        assert!(cbt.page_ref().is_none());
        assert_eq!(cbt.recno(), RECNO_OOB);
        assert_eq!(cbt.slot(), SLOT_NONE);
        assert!(!cbt.is_max_record());
    }

    #[test]
    fn test_clear_resets_position() {
        let mut cbt = CursorBTree::new();
        cbt.recno = 17;
        cbt.slot = 3;
        cbt.compare = -1;
        cbt.ins_head = Some(Arc::new(InsertHead::new()));
        cbt.set_max_record();

        cbt.clear();
        assert_eq!(cbt.recno(), RECNO_OOB);
        assert_eq!(cbt.slot(), SLOT_NONE);
        assert_eq!(cbt.compare(), 0);
        assert!(cbt.ins_head().is_none());
        assert!(!cbt.is_max_record());
        assert!(cbt.next_stack().iter().all(Option::is_none));
    }
}

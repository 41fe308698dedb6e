//! Insert skiplists: pending updates and appended records.
//!
//! Every leaf carries ordered skiplists of record numbers whose values
//! differ from the on-page image. Readers walk the lists without taking
//! the writer lock; writers link new entries under a per-list mutex after
//! validating the search stack they collected while reading.
//!
//! ```text
//! head[3] ---------------------------> [90] ------------> None
//! head[2] ---------> [40] -----------> [90] ------------> None
//! head[1] ---------> [40] --> [55] --> [90] ------------> None
//! head[0] --> [12] -> [40] --> [55] --> [90] --> [97] --> None
//! ```

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_common::{Recno, RetryStatus};

/// Maximum skiplist depth.
pub const MAX_SKIP_DEPTH: usize = 10;

/// Probability of adding one more level to a new entry (1 in 4).
const SKIP_PROBABILITY: u32 = u32::MAX / 4;

type Link = RwLock<Option<Arc<InsertEntry>>>;

/// A single modification of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// The record holds this value.
    Value(Bytes),
    /// The record was removed.
    Deleted,
}

/// An entry in an insert skiplist.
pub struct InsertEntry {
    recno: Recno,
    /// Update chain, newest last.
    updates: RwLock<Vec<Update>>,
    /// Forward links, one per level this entry participates in.
    next: Box<[Link]>,
}

impl InsertEntry {
    /// Creates an unlinked entry of the given depth (clamped to 1..=MAX_SKIP_DEPTH).
    pub fn new(recno: Recno, update: Update, depth: usize) -> Arc<Self> {
        let depth = depth.clamp(1, MAX_SKIP_DEPTH);
        Arc::new(Self {
            recno,
            updates: RwLock::new(vec![update]),
            next: (0..depth).map(|_| RwLock::new(None)).collect(),
        })
    }

    /// Returns the entry's record number.
    #[inline]
    pub fn recno(&self) -> Recno {
        self.recno
    }

    /// Returns the number of levels this entry is linked into.
    #[inline]
    pub fn depth(&self) -> usize {
        self.next.len()
    }

    /// Returns the newest update.
    pub fn latest(&self) -> Option<Update> {
        self.updates.read().last().cloned()
    }

    /// Returns the number of updates in the chain.
    pub fn update_count(&self) -> usize {
        self.updates.read().len()
    }

    /// Adds a newer update to the chain.
    pub fn push_update(&self, update: Update) {
        self.updates.write().push(update);
    }

    #[inline]
    fn next_at(&self, level: usize) -> Option<Arc<InsertEntry>> {
        self.next.get(level).and_then(|link| link.read().clone())
    }
}

impl std::fmt::Debug for InsertEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertEntry")
            .field("recno", &self.recno)
            .field("depth", &self.depth())
            .field("updates", &self.update_count())
            .finish()
    }
}

/// Names a forward link: a list head slot or an entry's `next` slot.
#[derive(Debug, Clone, Default)]
pub enum InsertLink {
    /// The list's head array.
    #[default]
    Head,
    /// The `next` array of an entry.
    After(Arc<InsertEntry>),
}

/// Search stacks collected by a skiplist probe.
///
/// `ins[i]` is the link at level `i` a new entry would be spliced into and
/// `next[i]` the entry that link pointed at during the search. The stacks
/// stay valid until the next search on the owning cursor; a writer that
/// finds them stale gets `RetryStatus::Restart`.
#[derive(Debug, Clone)]
pub struct InsertStack {
    pub(crate) ins: [InsertLink; MAX_SKIP_DEPTH],
    pub(crate) next: [Option<Arc<InsertEntry>>; MAX_SKIP_DEPTH],
}

impl InsertStack {
    /// Creates a stack positioned for insertion into an empty list.
    pub fn new() -> Self {
        Self {
            ins: std::array::from_fn(|_| InsertLink::Head),
            next: std::array::from_fn(|_| None),
        }
    }

    /// Resets the stack to the empty-list position.
    pub fn clear(&mut self) {
        for link in self.ins.iter_mut() {
            *link = InsertLink::Head;
        }
        for next in self.next.iter_mut() {
            *next = None;
        }
    }

    /// Returns the per-level splice links.
    pub fn ins(&self) -> &[InsertLink] {
        &self.ins
    }

    /// Returns the per-level successors observed during the search.
    pub fn next(&self) -> &[Option<Arc<InsertEntry>>] {
        &self.next
    }
}

impl Default for InsertStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Head of an insert skiplist.
pub struct InsertHead {
    head: [Link; MAX_SKIP_DEPTH],
    tail: [Link; MAX_SKIP_DEPTH],
    /// Serializes writers.
    write_lock: Mutex<()>,
    len: AtomicUsize,
}

impl InsertHead {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            head: std::array::from_fn(|_| RwLock::new(None)),
            tail: std::array::from_fn(|_| RwLock::new(None)),
            write_lock: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entry with the largest record number.
    pub fn last(&self) -> Option<Arc<InsertEntry>> {
        self.tail[0].read().clone()
    }

    /// Returns the entry with the smallest record number.
    pub fn first(&self) -> Option<Arc<InsertEntry>> {
        self.head[0].read().clone()
    }

    /// Returns every entry in record-number order.
    pub fn entries(&self) -> Vec<Arc<InsertEntry>> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.first();
        while let Some(entry) = cursor {
            cursor = entry.next_at(0);
            out.push(entry);
        }
        out
    }

    fn successor(&self, link: &InsertLink, level: usize) -> Option<Arc<InsertEntry>> {
        match link {
            InsertLink::Head => self.head[level].read().clone(),
            InsertLink::After(entry) => entry.next_at(level),
        }
    }

    /// Probes the list for `recno`, filling `stack` for a later insert.
    ///
    /// Returns the exact match if there is one. Otherwise returns the
    /// smallest entry larger than `recno`, or the last entry when `recno`
    /// is past every entry. Returns `None` only for an empty list.
    pub fn search(&self, stack: &mut InsertStack, recno: Recno) -> Option<Arc<InsertEntry>> {
        let last = self.last()?;

        // Fast path appends.
        if recno >= last.recno {
            for level in 0..MAX_SKIP_DEPTH {
                stack.ins[level] = if level == 0 {
                    InsertLink::After(Arc::clone(&last))
                } else {
                    match self.tail[level].read().clone() {
                        Some(tail) => InsertLink::After(tail),
                        None => InsertLink::Head,
                    }
                };
                stack.next[level] = None;
            }
            return Some(last);
        }

        // Go as far as possible at each level before stepping down.
        let mut link = InsertLink::Head;
        let mut found = None;
        let mut level = MAX_SKIP_DEPTH;
        while level > 0 {
            let i = level - 1;
            match self.successor(&link, i) {
                None => {
                    stack.next[i] = None;
                    stack.ins[i] = link.clone();
                    found = None;
                    level -= 1;
                }
                Some(entry) => {
                    if recno == entry.recno {
                        return Some(entry);
                    }
                    if recno > entry.recno {
                        link = InsertLink::After(entry);
                    } else {
                        stack.ins[i] = link.clone();
                        stack.next[i] = Some(Arc::clone(&entry));
                        found = Some(entry);
                        level -= 1;
                    }
                }
            }
        }
        found
    }

    /// Returns the entry for `recno`, if present.
    pub fn find(&self, recno: Recno) -> Option<Arc<InsertEntry>> {
        let mut stack = InsertStack::new();
        self.search(&mut stack, recno)
            .filter(|entry| entry.recno == recno)
    }

    /// Links `entry` at the position recorded in `stack`.
    ///
    /// Returns `Restart` if any level of the stack no longer matches the
    /// list; nothing is linked in that case.
    pub fn insert_serial(&self, stack: &InsertStack, entry: Arc<InsertEntry>) -> RetryStatus {
        let _guard = self.write_lock.lock();
        let depth = entry.depth();

        for level in 0..depth {
            if let InsertLink::After(prev) = &stack.ins[level] {
                if prev.depth() <= level {
                    return RetryStatus::Restart;
                }
            }
            let current = self.successor(&stack.ins[level], level);
            if !same_entry(current.as_ref(), stack.next[level].as_ref()) {
                return RetryStatus::Restart;
            }
        }

        self.link(&stack.ins, &stack.next, entry);
        RetryStatus::Complete
    }

    /// Appends a new entry after the current tail.
    ///
    /// `allocate` runs under the writer lock and proposes a record number;
    /// the entry gets the larger of that and one past the current tail.
    pub fn append_serial<F>(&self, allocate: F, update: Update, depth: usize) -> Arc<InsertEntry>
    where
        F: FnOnce() -> Recno,
    {
        let _guard = self.write_lock.lock();
        let mut recno = allocate();
        if let Some(last) = self.last() {
            recno = recno.max(last.recno + 1);
        }
        let entry = InsertEntry::new(recno, update, depth);

        let ins: [InsertLink; MAX_SKIP_DEPTH] =
            std::array::from_fn(|level| match self.tail[level].read().clone() {
                Some(tail) => InsertLink::After(tail),
                None => InsertLink::Head,
            });
        let next: [Option<Arc<InsertEntry>>; MAX_SKIP_DEPTH] = std::array::from_fn(|_| None);
        self.link(&ins, &next, Arc::clone(&entry));
        entry
    }

    /// Splices `entry` in; the caller holds the writer lock.
    fn link(
        &self,
        ins: &[InsertLink; MAX_SKIP_DEPTH],
        next: &[Option<Arc<InsertEntry>>; MAX_SKIP_DEPTH],
        entry: Arc<InsertEntry>,
    ) {
        let depth = entry.depth();
        for level in 0..depth {
            *entry.next[level].write() = next[level].clone();
        }
        for level in 0..depth {
            let slot = match &ins[level] {
                InsertLink::Head => &self.head[level],
                InsertLink::After(prev) => &prev.next[level],
            };
            *slot.write() = Some(Arc::clone(&entry));
            // The tail moves only once the entry is reachable from the head.
            if next[level].is_none() {
                *self.tail[level].write() = Some(Arc::clone(&entry));
            }
        }
        self.len.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for InsertHead {
    fn drop(&mut self) {
        for link in self.head.iter_mut().skip(1).chain(self.tail.iter_mut()) {
            link.get_mut().take();
        }
        // Unlink level 0 one entry at a time so a long chain does not
        // recurse through `InsertEntry::drop`.
        let mut cursor = self.head[0].get_mut().take();
        while let Some(entry) = cursor {
            cursor = match Arc::try_unwrap(entry) {
                Ok(mut entry) => entry.next[0].get_mut().take(),
                Err(_) => None,
            };
        }
    }
}

impl Default for InsertHead {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InsertHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertHead")
            .field("len", &self.len())
            .field("last", &self.last().map(|e| e.recno))
            .finish()
    }
}

fn same_entry(a: Option<&Arc<InsertEntry>>, b: Option<&Arc<InsertEntry>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Picks a random depth for a new entry.
pub fn choose_depth() -> usize {
    let mut rng = rand::rng();
    let mut depth = 1;
    while depth < MAX_SKIP_DEPTH && rng.random::<u32>() < SKIP_PROBABILITY {
        depth += 1;
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(v: &'static str) -> Update {
        Update::Value(Bytes::from_static(v.as_bytes()))
    }

    /// Inserts `recno` at a fixed depth, re-searching until the insert lands.
    fn insert(head: &InsertHead, recno: Recno, depth: usize) -> Arc<InsertEntry> {
        loop {
            let mut stack = InsertStack::new();
            if let Some(found) = head.search(&mut stack, recno) {
                if found.recno() == recno {
                    return found;
                }
            }
            let entry = InsertEntry::new(recno, value("v"), depth);
            if head.insert_serial(&stack, Arc::clone(&entry)) == RetryStatus::Complete {
                return entry;
            }
        }
    }

    fn recnos(head: &InsertHead) -> Vec<Recno> {
        head.entries().iter().map(|e| e.recno()).collect()
    }

    #[test]
    fn test_empty_list_search() {
        let head = InsertHead::new();
        let mut stack = InsertStack::new();

        assert!(head.search(&mut stack, 10).is_none());
        assert!(head.is_empty());
        assert!(head.last().is_none());
    }

    #[test]
    fn test_insert_keeps_order() {
        let head = InsertHead::new();
        for (recno, depth) in [(50, 3), (10, 1), (90, 5), (30, 2), (70, 1)] {
            insert(&head, recno, depth);
        }

        assert_eq!(recnos(&head), vec![10, 30, 50, 70, 90]);
        assert_eq!(head.len(), 5);
        assert_eq!(head.first().unwrap().recno(), 10);
        assert_eq!(head.last().unwrap().recno(), 90);
    }

    #[test]
    fn test_search_exact_match() {
        let head = InsertHead::new();
        for recno in [5, 15, 25] {
            insert(&head, recno, 2);
        }

        let mut stack = InsertStack::new();
        assert_eq!(head.search(&mut stack, 15).unwrap().recno(), 15);
        assert!(head.find(25).is_some());
        assert!(head.find(20).is_none());
    }

    #[test]
    fn test_search_returns_next_larger() {
        let head = InsertHead::new();
        for recno in [5, 15, 25] {
            insert(&head, recno, 1);
        }

        let mut stack = InsertStack::new();
        assert_eq!(head.search(&mut stack, 6).unwrap().recno(), 15);
        assert_eq!(head.search(&mut stack, 1).unwrap().recno(), 5);
        assert_eq!(stack.next()[0].as_ref().unwrap().recno(), 5);
        assert!(matches!(stack.ins()[0], InsertLink::Head));
    }

    #[test]
    fn test_search_past_end_returns_last() {
        let head = InsertHead::new();
        for recno in [5, 15, 25] {
            insert(&head, recno, 1);
        }

        let mut stack = InsertStack::new();
        let found = head.search(&mut stack, 1000).unwrap();
        assert_eq!(found.recno(), 25);
        match &stack.ins()[0] {
            InsertLink::After(prev) => assert_eq!(prev.recno(), 25),
            InsertLink::Head => panic!("expected tail link"),
        }
        assert!(stack.next().iter().all(Option::is_none));
    }

    #[test]
    fn test_stale_stack_restarts() {
        let head = InsertHead::new();
        insert(&head, 10, 1);
        insert(&head, 30, 1);

        let mut stack = InsertStack::new();
        head.search(&mut stack, 20);

        // A concurrent writer lands between 10 and 30.
        insert(&head, 25, 1);

        let entry = InsertEntry::new(20, value("late"), 1);
        assert_eq!(head.insert_serial(&stack, entry), RetryStatus::Restart);
        assert_eq!(recnos(&head), vec![10, 25, 30]);
    }

    #[test]
    fn test_empty_stack_inserts_into_empty_list() {
        let head = InsertHead::new();
        let stack = InsertStack::new();

        let entry = InsertEntry::new(7, value("x"), 4);
        assert_eq!(head.insert_serial(&stack, entry), RetryStatus::Complete);
        assert_eq!(head.last().unwrap().recno(), 7);

        // The same empty-list stack is stale now.
        let entry = InsertEntry::new(8, value("y"), 1);
        assert_eq!(head.insert_serial(&stack, entry), RetryStatus::Restart);
    }

    #[test]
    fn test_append_serial_allocates_past_tail() {
        let head = InsertHead::new();
        insert(&head, 100, 2);

        let entry = head.append_serial(|| 50, value("a"), 3);
        assert_eq!(entry.recno(), 101);

        let entry = head.append_serial(|| 200, value("b"), 1);
        assert_eq!(entry.recno(), 200);
        assert_eq!(recnos(&head), vec![100, 101, 200]);
    }

    #[test]
    fn test_update_chain() {
        let entry = InsertEntry::new(1, value("a"), 1);
        entry.push_update(Update::Deleted);

        assert_eq!(entry.update_count(), 2);
        assert_eq!(entry.latest(), Some(Update::Deleted));
    }

    #[test]
    fn test_depth_clamped() {
        assert_eq!(InsertEntry::new(1, Update::Deleted, 0).depth(), 1);
        assert_eq!(InsertEntry::new(1, Update::Deleted, 99).depth(), MAX_SKIP_DEPTH);
        for _ in 0..1000 {
            let depth = choose_depth();
            assert!((1..=MAX_SKIP_DEPTH).contains(&depth));
        }
    }

    #[test]
    fn test_concurrent_inserts_and_searches() {
        let head = InsertHead::new();

        std::thread::scope(|s| {
            for t in 0..4u64 {
                let head = &head;
                s.spawn(move || {
                    for i in 0..200u64 {
                        insert(head, i * 4 + t + 1, choose_depth());
                    }
                });
            }
            s.spawn(|| {
                let mut stack = InsertStack::new();
                for i in 0..2000u64 {
                    if let Some(found) = head.search(&mut stack, i % 800 + 1) {
                        assert!(found.recno() >= 1);
                    }
                }
            });
        });

        let all = recnos(&head);
        assert_eq!(all.len(), 800);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_tail_entry_reachable_during_appends() {
        let head = InsertHead::new();
        head.append_serial(|| 1, value("v"), 1);

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..20_000 {
                    head.append_serial(|| 0, value("v"), choose_depth());
                }
            });
            s.spawn(|| {
                let mut stack = InsertStack::new();
                for i in 0..20_000u64 {
                    let Some(last) = head.last() else { continue };
                    if last.recno() < 2 {
                        continue;
                    }
                    // Every record below the visible tail is already linked.
                    let recno = i % (last.recno() - 1) + 1;
                    let found = head.search(&mut stack, recno);
                    assert_eq!(found.map(|e| e.recno()), Some(recno));
                }
            });
        });

        assert_eq!(head.len(), 20_001);
    }

    #[test]
    fn test_drop_long_single_level_chain() {
        let head = InsertHead::new();
        for _ in 0..200_000 {
            head.append_serial(|| 1, value("v"), 1);
        }
        assert_eq!(head.len(), 200_000);
        assert_eq!(head.last().map(|e| e.recno()), Some(200_000));
        drop(head);
    }
}

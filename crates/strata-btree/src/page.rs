//! In-memory column-store pages.
//!
//! Three page layouts share one `Page` type:
//!
//! - Internal pages hold an index of child refs, sorted by starting
//!   record number. The index is replaced wholesale when it changes.
//! - Fixed-length leaves hold a packed bitfield with one value per record.
//! - Variable-length leaves hold run-length-encoded cells, plus a table of
//!   the runs longer than one record for fast lookup.
//!
//! Leaves also carry insert skiplists: per-record updates for on-page
//! records and an append list for records past the last on-page one.

use crate::insert::InsertHead;
use crate::reference::Ref;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use strata_common::{PageId, PageType, Recno};

/// A page and its identity.
pub struct Page {
    id: PageId,
    kind: PageKind,
}

/// Page contents by layout.
pub enum PageKind {
    ColInternal(ColInternal),
    ColFixed(ColFixed),
    ColVariable(ColVariable),
}

impl Page {
    /// Creates an internal page over `children`.
    pub fn internal(id: PageId, recno: Recno, children: Vec<Arc<Ref>>) -> Self {
        Self {
            id,
            kind: PageKind::ColInternal(ColInternal {
                recno,
                index: RwLock::new(Arc::new(PageIndex::new(children))),
            }),
        }
    }

    /// Creates a fixed-length leaf.
    pub fn fixed(id: PageId, leaf: ColFixed) -> Self {
        Self {
            id,
            kind: PageKind::ColFixed(leaf),
        }
    }

    /// Creates a variable-length leaf.
    pub fn variable(id: PageId, leaf: ColVariable) -> Self {
        Self {
            id,
            kind: PageKind::ColVariable(leaf),
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub fn page_type(&self) -> PageType {
        match self.kind {
            PageKind::ColInternal(_) => PageType::ColInternal,
            PageKind::ColFixed(_) => PageType::ColFixed,
            PageKind::ColVariable(_) => PageType::ColVariable,
        }
    }

    /// Returns the first record number the page covers.
    pub fn recno(&self) -> Recno {
        match &self.kind {
            PageKind::ColInternal(intl) => intl.recno,
            PageKind::ColFixed(fix) => fix.recno,
            PageKind::ColVariable(var) => var.recno,
        }
    }

    pub fn as_internal(&self) -> Option<&ColInternal> {
        match &self.kind {
            PageKind::ColInternal(intl) => Some(intl),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<&ColFixed> {
        match &self.kind {
            PageKind::ColFixed(fix) => Some(fix),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&ColVariable> {
        match &self.kind {
            PageKind::ColVariable(var) => Some(var),
            _ => None,
        }
    }

    /// Returns the append list of a leaf.
    pub fn append_head(&self) -> Option<&Arc<InsertHead>> {
        match &self.kind {
            PageKind::ColInternal(_) => None,
            PageKind::ColFixed(fix) => Some(&fix.append),
            PageKind::ColVariable(var) => Some(&var.append),
        }
    }

    /// Returns the last record number stored on the page image of a leaf.
    pub fn last_recno(&self) -> Option<Recno> {
        match &self.kind {
            PageKind::ColInternal(_) => None,
            PageKind::ColFixed(fix) => Some(fix.last_recno()),
            PageKind::ColVariable(var) => Some(var.last_recno()),
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("type", &self.page_type())
            .field("recno", &self.recno())
            .finish()
    }
}

/// An immutable snapshot of an internal page's children.
#[derive(Debug)]
pub struct PageIndex {
    refs: Vec<Arc<Ref>>,
}

impl PageIndex {
    pub fn new(refs: Vec<Arc<Ref>>) -> Self {
        Self { refs }
    }

    #[inline]
    pub fn entries(&self) -> usize {
        self.refs.len()
    }

    #[inline]
    pub fn refs(&self) -> &[Arc<Ref>] {
        &self.refs
    }

    #[inline]
    pub fn get(&self, indx: usize) -> Option<&Arc<Ref>> {
        self.refs.get(indx)
    }

    /// Returns the position of `child` in this snapshot.
    pub fn position(&self, child: &Arc<Ref>) -> Option<usize> {
        self.refs.iter().position(|r| Arc::ptr_eq(r, child))
    }
}

/// Internal page body.
pub struct ColInternal {
    recno: Recno,
    index: RwLock<Arc<PageIndex>>,
}

impl ColInternal {
    #[inline]
    pub fn recno(&self) -> Recno {
        self.recno
    }

    /// Returns the current index snapshot.
    #[inline]
    pub fn index(&self) -> Arc<PageIndex> {
        Arc::clone(&self.index.read())
    }

    /// Replaces the index. Readers holding the old snapshot keep it.
    pub(crate) fn publish_index(&self, index: Arc<PageIndex>) {
        *self.index.write() = index;
    }
}

/// Fixed-length leaf body.
pub struct ColFixed {
    recno: Recno,
    entries: u32,
    bit_count: u8,
    bitf: Bytes,
    /// Updates to on-page records; fixed pages keep a single list.
    update: Arc<InsertHead>,
    append: Arc<InsertHead>,
}

impl ColFixed {
    /// Packs `values` into a leaf starting at `recno`, masking each value
    /// to `bit_count` bits.
    pub fn new(recno: Recno, bit_count: u8, values: &[u8]) -> Self {
        let bit_count = bit_count.clamp(1, 8);
        let bits = values.len() * bit_count as usize;
        let mut bitf = vec![0u8; bits.div_ceil(8)];
        for (entry, value) in values.iter().enumerate() {
            bit_setv(&mut bitf, entry, bit_count, *value);
        }
        Self {
            recno,
            entries: u32::try_from(values.len()).unwrap_or(u32::MAX),
            bit_count,
            bitf: Bytes::from(bitf),
            update: Arc::new(InsertHead::new()),
            append: Arc::new(InsertHead::new()),
        }
    }

    #[inline]
    pub fn recno(&self) -> Recno {
        self.recno
    }

    #[inline]
    pub fn entries(&self) -> u32 {
        self.entries
    }

    #[inline]
    pub fn bit_count(&self) -> u8 {
        self.bit_count
    }

    /// Returns the on-page value at `slot`.
    pub fn value(&self, slot: u32) -> Option<u8> {
        (slot < self.entries).then(|| bit_getv(&self.bitf, slot as usize, self.bit_count))
    }

    /// Returns the last on-page record number; `recno - 1` when empty.
    pub fn last_recno(&self) -> Recno {
        (self.recno + u64::from(self.entries)).saturating_sub(1)
    }

    pub fn update_head(&self) -> &Arc<InsertHead> {
        &self.update
    }

    pub fn append(&self) -> &Arc<InsertHead> {
        &self.append
    }
}

fn bit_getv(bitf: &[u8], entry: usize, width: u8) -> u8 {
    let bit = entry * width as usize;
    let (byte, shift) = (bit / 8, bit % 8);
    let lo = u16::from(bitf.get(byte).copied().unwrap_or(0));
    let hi = u16::from(bitf.get(byte + 1).copied().unwrap_or(0));
    let mask = (1u16 << width) - 1;
    (((lo | (hi << 8)) >> shift) & mask) as u8
}

fn bit_setv(bitf: &mut [u8], entry: usize, width: u8, value: u8) {
    let bit = entry * width as usize;
    let (byte, shift) = (bit / 8, bit % 8);
    let mask = (1u16 << width) - 1;
    let value = (u16::from(value) & mask) << shift;
    let clear = !(mask << shift);
    bitf[byte] = (u16::from(bitf[byte]) & clear | value) as u8;
    if shift + width as usize > 8 {
        bitf[byte + 1] = ((u16::from(bitf[byte + 1]) << 8 & clear | value) >> 8) as u8;
    }
}

/// A variable-length cell: a value (or a deleted record) repeated `rle` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColCell {
    pub value: Option<Bytes>,
    pub rle: u64,
}

impl ColCell {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(value.into()),
            rle: 1,
        }
    }

    pub fn repeated(value: impl Into<Bytes>, rle: u64) -> Self {
        Self {
            value: Some(value.into()),
            rle,
        }
    }

    pub fn deleted(rle: u64) -> Self {
        Self { value: None, rle }
    }
}

/// A run of more than one record in a variable-length leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColRle {
    /// Cell slot holding the run.
    pub indx: u32,
    /// First record number of the run.
    pub recno: Recno,
    /// Records in the run.
    pub rle: u64,
}

/// Variable-length leaf body.
pub struct ColVariable {
    recno: Recno,
    cells: Vec<ColCell>,
    repeats: Vec<ColRle>,
    /// Per-slot update lists, created on first write.
    updates: Box<[OnceLock<Arc<InsertHead>>]>,
    append: Arc<InsertHead>,
}

impl ColVariable {
    /// Builds a leaf starting at `recno`. Cells with `rle == 0` count as one record.
    pub fn new(recno: Recno, cells: Vec<ColCell>) -> Self {
        let mut cells = cells;
        let mut repeats = Vec::new();
        let mut next = recno;
        for (indx, cell) in cells.iter_mut().enumerate() {
            cell.rle = cell.rle.max(1);
            if cell.rle > 1 {
                repeats.push(ColRle {
                    indx: u32::try_from(indx).unwrap_or(u32::MAX),
                    recno: next,
                    rle: cell.rle,
                });
            }
            next += cell.rle;
        }
        let updates = (0..cells.len()).map(|_| OnceLock::new()).collect();
        Self {
            recno,
            cells,
            repeats,
            updates,
            append: Arc::new(InsertHead::new()),
        }
    }

    #[inline]
    pub fn recno(&self) -> Recno {
        self.recno
    }

    /// Returns the number of cells.
    #[inline]
    pub fn entries(&self) -> u32 {
        u32::try_from(self.cells.len()).unwrap_or(u32::MAX)
    }

    pub fn cell(&self, slot: u32) -> Option<&ColCell> {
        self.cells.get(slot as usize)
    }

    pub fn repeats(&self) -> &[ColRle] {
        &self.repeats
    }

    /// Returns the number of records the cells cover.
    pub fn records(&self) -> u64 {
        self.cells.iter().map(|c| c.rle).sum()
    }

    /// Finds the cell slot holding `recno`.
    ///
    /// Binary searches the run table; a record that falls between runs is
    /// located by counting single-record cells from the preceding run.
    pub fn search(&self, recno: Recno) -> Option<u32> {
        if recno < self.recno {
            return None;
        }

        let mut base = 0usize;
        let mut limit = self.repeats.len();
        while limit != 0 {
            let indx = base + (limit >> 1);
            let repeat = &self.repeats[indx];
            if recno >= repeat.recno && recno < repeat.recno + repeat.rle {
                return Some(repeat.indx);
            }
            if recno >= repeat.recno {
                base = indx + 1;
                limit -= 1;
            }
            limit >>= 1;
        }

        let (start_indx, start_recno) = match base {
            0 => (0u32, self.recno),
            _ => {
                let repeat = &self.repeats[base - 1];
                (repeat.indx + 1, repeat.recno + repeat.rle)
            }
        };

        let remaining = u64::from(self.entries() - start_indx);
        if recno - start_recno >= remaining {
            return None;
        }
        u32::try_from(recno - start_recno)
            .ok()
            .map(|offset| start_indx + offset)
    }

    /// Returns the last on-page record number, or 0 for an empty page.
    pub fn last_recno(&self) -> Recno {
        let entries = u64::from(self.entries());
        match self.repeats.last() {
            None if entries == 0 => 0,
            None => self.recno + entries - 1,
            Some(repeat) => {
                repeat.recno + repeat.rle - 1 + (entries - (u64::from(repeat.indx) + 1))
            }
        }
    }

    /// Returns the update list of `slot`, if one was created.
    pub fn update_head(&self, slot: u32) -> Option<&Arc<InsertHead>> {
        self.updates.get(slot as usize).and_then(OnceLock::get)
    }

    /// Returns the update list of `slot`, creating it if needed.
    pub fn update_head_or_init(&self, slot: u32) -> Option<&Arc<InsertHead>> {
        self.updates
            .get(slot as usize)
            .map(|cell| cell.get_or_init(|| Arc::new(InsertHead::new())))
    }

    pub fn append(&self) -> &Arc<InsertHead> {
        &self.append
    }
}

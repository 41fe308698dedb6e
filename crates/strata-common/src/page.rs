//! Page identifiers and page types.

use serde::{Deserialize, Serialize};

/// Unique identifier for a page within a file.
///
/// PageId consists of a file ID and page number within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier.
    pub file_id: u32,
    /// Page number within the file (0-indexed).
    pub page_num: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}

/// Page types in a column-store B+tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Column-store internal page.
    ColInternal = 1,
    /// Column-store fixed-width leaf page.
    ColFixed = 2,
    /// Column-store variable-width (run-length encoded) leaf page.
    ColVariable = 3,
}

impl PageType {
    /// Returns true for leaf page types.
    pub fn is_leaf(self) -> bool {
        !matches!(self, PageType::ColInternal)
    }
}

impl std::fmt::Display for PageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PageType::ColInternal => "col-int",
            PageType::ColFixed => "col-fix",
            PageType::ColVariable => "col-var",
        };
        f.write_str(name)
    }
}

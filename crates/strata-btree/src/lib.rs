//! Column-store B+tree for Strata.
//!
//! This crate provides:
//! - Record-number search from the root or from a pinned leaf
//! - Fixed-length (bit-packed) and variable-length (run-length) leaves
//! - Insert skiplists for updates and appended records
//! - Copy-on-write internal splits that readers detect and survive
//! - A bulk loader and the update, remove and append write paths
//!
//! ## Descent
//!
//! ```text
//!            root (never pinned)
//!           /    |     \
//!      [1..] [401..] [801..]        page_swap: pin child, then release parent
//!       / \     |      |
//!   leaf leaf  leaf   leaf -> append list
//!     |
//!   update lists per slot
//! ```
//!
//! Searches take no locks. A reader that follows the right-most child of
//! a page which has since split restarts from the root; a reader whose
//! chosen child was replaced re-reads the current page's index.

mod builder;
mod cursor;
mod insert;
mod modify;
mod page;
mod reference;
mod search;
mod split;
mod tree;

pub use builder::{LeafSpec, TreeBuilder};
pub use cursor::CursorBTree;
pub use insert::{
    InsertEntry, InsertHead, InsertLink, InsertStack, MAX_SKIP_DEPTH, Update, choose_depth,
};
pub use page::{ColCell, ColFixed, ColInternal, ColRle, ColVariable, Page, PageIndex, PageKind};
pub use reference::Ref;
pub use search::check_leaf_key_range;
pub use split::split_intl_race;
pub use tree::{ColumnTree, TreeStats};

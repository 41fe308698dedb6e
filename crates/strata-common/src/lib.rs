//! Strata common types, errors, and configuration.
//!
//! This crate provides shared definitions used by the page cache and the
//! column-store B+tree.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::{CacheConfig, TreeConfig};
pub use error::{Result, RetryStatus, StrataError};
pub use page::{PageId, PageType};
pub use types::{RECNO_ALLOCATE, RECNO_OOB, Recno, SLOT_NONE, recno_sign};

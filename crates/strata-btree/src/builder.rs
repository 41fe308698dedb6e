//! Bulk loading.

use crate::page::{ColCell, ColFixed, ColVariable, Page};
use crate::reference::Ref;
use crate::tree::ColumnTree;
use bytes::Bytes;
use std::sync::Arc;
use strata_cache::{BackingStore, InMemoryPageStore, PageCache};
use strata_common::{PageId, Recno, Result, StrataError, TreeConfig};
use tracing::debug;

/// First record number of every tree.
const FIRST_RECNO: Recno = 1;

/// Leaf contents handed to the builder.
#[derive(Debug, Clone)]
pub enum LeafSpec {
    Fixed(Vec<u8>),
    Variable(Vec<ColCell>),
}

impl LeafSpec {
    fn records(&self) -> u64 {
        match self {
            LeafSpec::Fixed(values) => values.len() as u64,
            LeafSpec::Variable(cells) => cells.iter().map(|c| c.rle.max(1)).sum(),
        }
    }
}

/// Builds a tree from leaves laid out left to right.
///
/// Leaves get consecutive record ranges starting at 1. Internal levels
/// are stacked `internal_fanout` children at a time until one page
/// remains; that page becomes the root, so the root is always internal.
pub struct TreeBuilder {
    config: TreeConfig,
    store: Option<Arc<dyn BackingStore<Page>>>,
    file_id: u32,
    leaves: Vec<LeafSpec>,
}

impl TreeBuilder {
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            store: None,
            file_id: 0,
            leaves: Vec::new(),
        }
    }

    /// Uses `store` as the backing store for evicted pages.
    pub fn with_store(mut self, store: Arc<dyn BackingStore<Page>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the file component of every page id.
    pub fn with_file_id(mut self, file_id: u32) -> Self {
        self.file_id = file_id;
        self
    }

    /// Adds one fixed-length leaf.
    pub fn fixed_leaf(mut self, values: Vec<u8>) -> Self {
        self.leaves.push(LeafSpec::Fixed(values));
        self
    }

    /// Adds one variable-length leaf.
    pub fn variable_leaf(mut self, cells: Vec<ColCell>) -> Self {
        self.leaves.push(LeafSpec::Variable(cells));
        self
    }

    /// Adds fixed-length leaves of at most `leaf_max_entries` records each.
    pub fn fixed_records(mut self, values: &[u8]) -> Self {
        for chunk in values.chunks(self.config.leaf_max_entries.max(1)) {
            self.leaves.push(LeafSpec::Fixed(chunk.to_vec()));
        }
        self
    }

    /// Adds variable-length leaves of at most `leaf_max_entries` cells
    /// each, one record per cell. `None` stores a deleted record.
    pub fn variable_records(mut self, values: Vec<Option<Bytes>>) -> Self {
        let per_leaf = self.config.leaf_max_entries.max(1);
        let mut cells: Vec<ColCell> = Vec::with_capacity(per_leaf);
        for value in values {
            cells.push(ColCell { value, rle: 1 });
            if cells.len() == per_leaf {
                self.leaves
                    .push(LeafSpec::Variable(std::mem::take(&mut cells)));
            }
        }
        if !cells.is_empty() {
            self.leaves.push(LeafSpec::Variable(cells));
        }
        self
    }

    pub fn build(self) -> Result<ColumnTree> {
        self.config.validate()?;

        let store: Arc<dyn BackingStore<Page>> = match self.store.clone() {
            Some(store) => store,
            None => Arc::new(InMemoryPageStore::<Page>::new()),
        };
        let cache = PageCache::new(self.config.cache.clone(), store);

        let mut leaves = self.leaves;
        if leaves.is_empty() {
            leaves.push(LeafSpec::Variable(Vec::new()));
        } else if leaves.len() > 1 && leaves.iter().any(|l| l.records() == 0) {
            return Err(StrataError::ConfigError(
                "only a single-leaf tree may have an empty leaf".to_string(),
            ));
        }

        let mut next_page = 0u32;
        let mut alloc = || {
            let id = PageId::new(self.file_id, next_page);
            next_page += 1;
            id
        };

        let mut recno = FIRST_RECNO;
        let mut level: Vec<Arc<Ref>> = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let id = alloc();
            let records = leaf.records();
            let page = match leaf {
                LeafSpec::Fixed(values) => Page::fixed(
                    id,
                    ColFixed::new(recno, self.config.fixed_bit_count, &values),
                ),
                LeafSpec::Variable(cells) => Page::variable(id, ColVariable::new(recno, cells)),
            };
            let slot = cache.new_resident_slot(Some(id), Arc::new(page));
            level.push(Arc::new(Ref::new(slot, recno)));
            recno += records;
        }
        let last_recno = recno - 1;

        let mut depth = 1;
        loop {
            let mut parents = Vec::with_capacity(level.len().div_ceil(self.config.internal_fanout));
            for children in level.chunks(self.config.internal_fanout) {
                let id = alloc();
                let start = children[0].recno();
                let page = Arc::new(Page::internal(id, start, children.to_vec()));
                for (indx, child) in children.iter().enumerate() {
                    child.set_home(&page);
                    child.set_pindex_hint(indx);
                }
                let slot = cache.new_resident_slot(Some(id), page);
                parents.push(Arc::new(Ref::new(slot, start)));
            }
            depth += 1;
            level = parents;
            if level.len() == 1 {
                break;
            }
        }

        let root = level
            .pop()
            .ok_or_else(|| StrataError::Internal("bulk load produced no root".to_string()))?;
        debug!(
            depth,
            last_recno,
            pages = next_page,
            "column tree built"
        );

        Ok(ColumnTree::new(
            self.config,
            cache,
            root,
            self.file_id,
            next_page,
            last_recno,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::PageType;

    fn config(fanout: usize, per_leaf: usize) -> TreeConfig {
        TreeConfig {
            internal_fanout: fanout,
            leaf_max_entries: per_leaf,
            ..TreeConfig::default()
        }
    }

    #[test]
    fn test_empty_tree_has_one_empty_leaf() {
        let tree = TreeBuilder::new(TreeConfig::default()).build().unwrap();
        let root = tree.root().page().unwrap();
        let index = root.as_internal().unwrap().index();

        assert_eq!(index.entries(), 1);
        let leaf = index.get(0).unwrap().page().unwrap();
        assert_eq!(leaf.page_type(), PageType::ColVariable);
        assert_eq!(tree.last_recno(), 0);
    }

    #[test]
    fn test_levels_stack_by_fanout() {
        let tree = TreeBuilder::new(config(3, 10))
            .fixed_records(&[0; 100])
            .build()
            .unwrap();

        // 10 leaves, 4 parents, 2 grandparents, 1 root.
        let root = tree.root().page().unwrap();
        let index = root.as_internal().unwrap().index();
        assert_eq!(index.entries(), 2);
        assert_eq!(index.get(1).unwrap().recno(), 91);
        assert_eq!(tree.last_recno(), 100);
    }

    #[test]
    fn test_homes_and_hints() {
        let tree = TreeBuilder::new(config(4, 5))
            .variable_records((0..40).map(|i| Some(Bytes::from(format!("{i}")))).collect())
            .build()
            .unwrap();

        let root = tree.root().page().unwrap();
        assert!(tree.root().home().is_none());
        for (indx, child) in root.as_internal().unwrap().index().refs().iter().enumerate() {
            assert!(Arc::ptr_eq(&child.home().unwrap(), &root));
            assert_eq!(child.pindex_hint() as usize, indx);
        }
    }

    #[test]
    fn test_single_empty_fixed_leaf() {
        let tree = TreeBuilder::new(TreeConfig::default())
            .fixed_leaf(Vec::new())
            .build()
            .unwrap();
        assert_eq!(tree.last_recno(), 0);
        assert_eq!(tree.get(1).unwrap(), None);
        assert_eq!(tree.append(Bytes::from_static(&[4])).unwrap(), 1);
        assert_eq!(tree.get(1).unwrap(), Some(Bytes::from_static(&[4])));
    }

    #[test]
    fn test_rejects_empty_leaf_among_others() {
        let result = TreeBuilder::new(TreeConfig::default())
            .fixed_leaf(vec![1, 2])
            .fixed_leaf(Vec::new())
            .build();
        assert!(matches!(result, Err(StrataError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = TreeBuilder::new(config(1, 10)).build();
        assert!(matches!(result, Err(StrataError::InvalidParameter { .. })));
    }

    #[test]
    fn test_variable_leaf_recnos_follow_runs() {
        let tree = TreeBuilder::new(TreeConfig::default())
            .variable_leaf(vec![ColCell::repeated("x", 5)])
            .variable_leaf(vec![ColCell::new("y")])
            .build()
            .unwrap();

        let root = tree.root().page().unwrap();
        let index = root.as_internal().unwrap().index();
        assert_eq!(index.get(1).unwrap().recno(), 6);
        assert_eq!(tree.last_recno(), 6);
    }
}

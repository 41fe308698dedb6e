//! Configuration structures for Strata.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};

/// Configuration for a column-store tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Maximum children per internal page built by the bulk loader.
    pub internal_fanout: usize,
    /// Maximum records per leaf page built by the bulk loader.
    pub leaf_max_entries: usize,
    /// Bits per value on fixed-width leaf pages (1..=8).
    pub fixed_bit_count: u8,
    /// Stale-stack insert retries tolerated before a warning is logged.
    pub insert_retry_warn: u32,
    /// Page cache settings.
    pub cache: CacheConfig,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            internal_fanout: 64,
            leaf_max_entries: 1024,
            fixed_bit_count: 8,
            insert_retry_warn: 16,
            cache: CacheConfig::default(),
        }
    }
}

impl TreeConfig {
    /// Checks every parameter against its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.internal_fanout < 2 {
            return Err(invalid("internal_fanout", self.internal_fanout));
        }
        if self.leaf_max_entries == 0 || self.leaf_max_entries > u32::MAX as usize {
            return Err(invalid("leaf_max_entries", self.leaf_max_entries));
        }
        if !(1..=8).contains(&self.fixed_bit_count) {
            return Err(invalid("fixed_bit_count", self.fixed_bit_count));
        }
        self.cache.validate()
    }
}

/// Configuration for the page cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Advisory resident page limit; statistics report when it is exceeded.
    pub resident_page_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resident_page_limit: 8192,
        }
    }
}

impl CacheConfig {
    /// Checks every parameter against its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.resident_page_limit == 0 {
            return Err(invalid("resident_page_limit", self.resident_page_limit));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> StrataError {
    StrataError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_config_defaults() {
        let config = TreeConfig::default();
        assert_eq!(config.internal_fanout, 64);
        assert_eq!(config.leaf_max_entries, 1024);
        assert_eq!(config.fixed_bit_count, 8);
        assert_eq!(config.insert_retry_warn, 16);
        assert_eq!(config.cache.resident_page_limit, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tree_config_rejects_small_fanout() {
        let config = TreeConfig {
            internal_fanout: 1,
            ..TreeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter: internal_fanout = 1");
    }

    #[test]
    fn test_tree_config_rejects_bit_count() {
        for bits in [0u8, 9, 255] {
            let config = TreeConfig {
                fixed_bit_count: bits,
                ..TreeConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(StrataError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_tree_config_rejects_empty_leaves() {
        let config = TreeConfig {
            leaf_max_entries: 0,
            ..TreeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_config_rejects_zero_limit() {
        let config = CacheConfig {
            resident_page_limit: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tree_config_serde_roundtrip() {
        let original = TreeConfig {
            internal_fanout: 8,
            fixed_bit_count: 4,
            ..TreeConfig::default()
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: TreeConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.internal_fanout, 8);
        assert_eq!(deserialized.fixed_bit_count, 4);
        assert_eq!(deserialized.leaf_max_entries, original.leaf_max_entries);
    }

    #[test]
    fn test_tree_config_partial_json_uses_defaults() {
        let config: TreeConfig = serde_json::from_str(r#"{"internal_fanout": 4}"#).unwrap();
        assert_eq!(config.internal_fanout, 4);
        assert_eq!(config.leaf_max_entries, 1024);
        assert_eq!(config.cache.resident_page_limit, 8192);
    }
}

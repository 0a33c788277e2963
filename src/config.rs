/// Block-tree writer/reader settings.
///
/// `min_items_in_block` / `max_items_in_block` bound how many entries (terms or
/// sub-block pointers) one physical block holds. A prefix that gathers more than
/// `max_items_in_block` entries is split into floor blocks.
use crate::error::{Result, TermDictError};

pub const DEFAULT_MIN_ITEMS_IN_BLOCK: usize = 25;
pub const DEFAULT_MAX_ITEMS_IN_BLOCK: usize = 48;

/// Default number of byte ranges kept by `FileBlockStore`'s read cache.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTreeConfig {
    pub min_items_in_block: usize,
    pub max_items_in_block: usize,
    pub block_cache_capacity: usize,
}

impl Default for BlockTreeConfig {
    fn default() -> Self {
        BlockTreeConfig {
            min_items_in_block: DEFAULT_MIN_ITEMS_IN_BLOCK,
            max_items_in_block: DEFAULT_MAX_ITEMS_IN_BLOCK,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
        }
    }
}

impl BlockTreeConfig {
    pub fn new(min_items_in_block: usize, max_items_in_block: usize) -> Result<Self> {
        let config = BlockTreeConfig {
            min_items_in_block,
            max_items_in_block,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_block_cache_capacity(mut self, capacity: usize) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    /// Check the block-size bounds.
    ///
    /// The greedy floor splitter closes a fragment at the first lead-byte boundary
    /// after `min` entries, and a run of entries sharing one lead byte is shorter
    /// than `min`, so every fragment stays within `max` only if `2 * (min - 1) <= max`.
    pub fn validate(&self) -> Result<()> {
        if self.min_items_in_block <= 1 {
            return Err(TermDictError::Config(format!(
                "min_items_in_block must be >= 2; got {}",
                self.min_items_in_block
            )));
        }
        if self.min_items_in_block > self.max_items_in_block {
            return Err(TermDictError::Config(format!(
                "min_items_in_block {} > max_items_in_block {}",
                self.min_items_in_block, self.max_items_in_block
            )));
        }
        if 2 * (self.min_items_in_block - 1) > self.max_items_in_block {
            return Err(TermDictError::Config(format!(
                "2 * (min_items_in_block {} - 1) > max_items_in_block {}",
                self.min_items_in_block, self.max_items_in_block
            )));
        }
        if self.block_cache_capacity == 0 {
            return Err(TermDictError::Config(
                "block_cache_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        BlockTreeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_min_below_two() {
        assert!(matches!(
            BlockTreeConfig::new(1, 10),
            Err(TermDictError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_min_above_max() {
        assert!(matches!(
            BlockTreeConfig::new(10, 8),
            Err(TermDictError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_max_too_small_for_floor_splitting() {
        // 2 * (10 - 1) = 18 > 12
        assert!(matches!(
            BlockTreeConfig::new(10, 12),
            Err(TermDictError::Config(_))
        ));
        BlockTreeConfig::new(2, 2).unwrap();
        BlockTreeConfig::new(4, 6).unwrap();
    }

    #[test]
    fn test_rejects_zero_cache() {
        let config = BlockTreeConfig::default().with_block_cache_capacity(0);
        assert!(config.validate().is_err());
    }
}

use crate::buf::{align_to_sector_size, SECTOR_SIZE};
use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::spill::FileSpillStore;
use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The size of all large temp table blocks unless configured otherwise.
pub const DEFAULT_BLOCK_SIZE: Byte = Byte::from_u64(8 * 1024 * 1024); // 8MB
pub const DEFAULT_MAX_CACHE_SIZE: Byte = Byte::from_u64(64 * 1024 * 1024);
pub const DEFAULT_SPILL_FILE_PREFIX: &str = "ltt.block";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockCacheConfig {
    // Controls the maximum bytes resident blocks may occupy.
    // Growing past this amount spills an unpinned block to
    // secondary storage.
    pub max_cache_size: Byte,
    // Controls the fixed size of every block.
    // Must be a multiple of the storage sector size.
    pub block_size: Byte,
    // Prefix of spill files.
    // The complete file name pattern is:
    // <file-prefix>.<block-id>
    // e.g. ltt.block.42
    pub spill_file_prefix: String,
}

impl BlockCacheConfig {
    /// How many bytes resident blocks may occupy before the cache spills.
    #[inline]
    pub fn max_cache_size<T>(mut self, max_cache_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.max_cache_size = Byte::from(max_cache_size);
        self
    }

    /// Fixed size of every block, aligned up to sector size.
    #[inline]
    pub fn block_size<T>(mut self, block_size: T) -> Self
    where
        Byte: From<T>,
    {
        let size = Byte::from(block_size);
        let aligned_size = align_to_sector_size(size.as_u64() as usize);
        self.block_size = <Byte as From<usize>>::from(aligned_size);
        self
    }

    /// Spill file name prefix.
    #[inline]
    pub fn spill_file_prefix(mut self, spill_file_prefix: impl Into<String>) -> Self {
        self.spill_file_prefix = spill_file_prefix.into();
        self
    }

    /// Place spill files under given directory.
    #[inline]
    pub fn with_spill_dir(mut self, spill_dir: impl AsRef<Path>) -> Self {
        let path = spill_dir.as_ref().join(&self.spill_file_prefix);
        self.spill_file_prefix = path.to_string_lossy().to_string();
        self
    }

    /// Parse config from toml string.
    #[inline]
    pub fn from_toml(input: &str) -> Result<Self> {
        let config = toml::from_str(input)?;
        Ok(config)
    }

    /// Build a block cache backed by a file spill store.
    #[inline]
    pub fn build(self) -> Result<BlockCache<FileSpillStore>> {
        let store = FileSpillStore::new(&self.spill_file_prefix)?;
        BlockCache::new(self, store)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let block_size = self.block_size.as_u64() as usize;
        if block_size == 0 || block_size % SECTOR_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        if (self.max_cache_size.as_u64() as usize) < block_size {
            return Err(Error::CacheSizeTooSmall);
        }
        Ok(())
    }
}

impl Default for BlockCacheConfig {
    #[inline]
    fn default() -> Self {
        BlockCacheConfig {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            spill_file_prefix: String::from(DEFAULT_SPILL_FILE_PREFIX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BlockCacheConfig::default();
        assert_eq!(config.max_cache_size, DEFAULT_MAX_CACHE_SIZE);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.spill_file_prefix, DEFAULT_SPILL_FILE_PREFIX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BlockCacheConfig::default()
            .block_size(5000u64)
            .max_cache_size(1024u64 * 1024)
            .spill_file_prefix("spill")
            .with_spill_dir("/tmp/terndb");
        // block size aligned up to sector size.
        assert_eq!(config.block_size.as_u64(), 8192);
        assert_eq!(config.max_cache_size.as_u64(), 1024 * 1024);
        assert_eq!(config.spill_file_prefix, "/tmp/terndb/spill");
    }

    #[test]
    fn test_config_from_toml() {
        let config = BlockCacheConfig::from_toml(
            r#"
            max_cache_size = 16384
            block_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.max_cache_size.as_u64(), 16384);
        assert_eq!(config.block_size.as_u64(), 4096);
        assert_eq!(config.spill_file_prefix, DEFAULT_SPILL_FILE_PREFIX);

        assert!(BlockCacheConfig::from_toml("max_cache_size = []").is_err());
    }

    #[test]
    fn test_config_validate() {
        // Ceiling smaller than one block.
        let config = BlockCacheConfig::default()
            .block_size(8192u64)
            .max_cache_size(4096u64);
        assert!(matches!(config.validate(), Err(Error::CacheSizeTooSmall)));
        // Unaligned block size straight from deserialization.
        let config = BlockCacheConfig::from_toml("block_size = 100").unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidArgument)));
    }
}

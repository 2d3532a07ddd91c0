mod file;

pub use file::{list_spill_files, FileSpillStore};

use crate::block::BlockId;
use crate::buf::BlockBuf;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Secondary storage for spilled large temp table blocks, keyed by
/// block id.
///
/// The cache detaches a block's buffer and lends it to persist; only
/// after persist succeeds is the buffer dropped, so a failed write
/// leaves the bytes with the cache and the block stays resident.
pub trait SpillStore {
    /// Store the bytes of the given block, keyed by its id. A later
    /// persist of the same id overwrites the previous image.
    fn persist(&mut self, block_id: BlockId, data: &BlockBuf) -> Result<()>;

    /// Retrieve previously persisted bytes of the given block into a
    /// fresh buffer. The persisted image is kept until delete.
    fn load(&mut self, block_id: BlockId) -> Result<BlockBuf>;

    /// Discard the persisted image of the given block.
    fn delete(&mut self, block_id: BlockId) -> Result<()>;
}

/// In-memory spill store.
///
/// Keeps spilled block images on the heap. Used by tests and by
/// deployments without a spill directory, where large temp tables may
/// exceed the cache ceiling but not the machine.
pub struct MemSpillStore {
    blocks: HashMap<BlockId, Box<[u8]>>,
}

impl MemSpillStore {
    /// Create an empty store.
    #[inline]
    pub fn new() -> Self {
        MemSpillStore {
            blocks: HashMap::new(),
        }
    }

    /// Returns number of spilled block images in this store.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for MemSpillStore {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl SpillStore for MemSpillStore {
    #[inline]
    fn persist(&mut self, block_id: BlockId, data: &BlockBuf) -> Result<()> {
        self.blocks
            .insert(block_id, data.as_bytes().to_vec().into_boxed_slice());
        Ok(())
    }

    #[inline]
    fn load(&mut self, block_id: BlockId) -> Result<BlockBuf> {
        match self.blocks.get(&block_id) {
            Some(bytes) => BlockBuf::with_data(bytes),
            None => Err(Error::BlockNotFound(block_id)),
        }
    }

    #[inline]
    fn delete(&mut self, block_id: BlockId) -> Result<()> {
        match self.blocks.remove(&block_id) {
            Some(_) => Ok(()),
            None => Err(Error::BlockNotFound(block_id)),
        }
    }
}

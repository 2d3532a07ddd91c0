mod lru;

use crate::block::{Block, BlockId, TableId};
use crate::config::BlockCacheConfig;
use crate::error::{Error, Result};
use crate::spill::SpillStore;
use lru::{LruList, NodeId};
use std::collections::HashMap;
use std::fmt::Write;

/// There is one instance of this cache for each engine worker.
///
/// The cache keeps track of tuple blocks (and the outlined-object pools
/// inside them) for all large temp tables currently in use by the
/// worker. It owns every block: callers address blocks by id and borrow
/// a block only while they keep it pinned. When resident blocks grow
/// past the configured ceiling, the least recently used unpinned block
/// is spilled to the secondary store and reloaded on the next fetch.
pub struct BlockCache<S: SpillStore> {
    max_cache_size: usize,
    block_size: usize,
    store: S,
    // The front of the block list are the most recently used blocks.
    // The tail will be the least recently used blocks.
    // Eviction scans from the tail.
    list: LruList<Block>,
    id_map: HashMap<BlockId, NodeId>,
    next_block_id: BlockId,
    total_allocated: usize,
}

impl<S: SpillStore> BlockCache<S> {
    /// Create a cache containing zero large temp table blocks.
    #[inline]
    pub fn new(config: BlockCacheConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(BlockCache {
            max_cache_size: config.max_cache_size.as_u64() as usize,
            block_size: config.block_size.as_u64() as usize,
            store,
            list: LruList::new(),
            id_map: HashMap::new(),
            next_block_id: 0,
            total_allocated: 0,
        })
    }

    /// Get a new empty block for the supplied table. Returns the id of
    /// the new block and the block itself, pinned and resident. The
    /// borrow is valid only while the caller keeps the block pinned.
    #[inline]
    pub fn get_empty_block(&mut self, owner: TableId) -> Result<(BlockId, &mut Block)> {
        let block_id = self.next_id();
        let mut block = Block::new(block_id, owner, self.block_size)?;
        block.pin();
        let node_id = self.list.push_front(block);
        self.id_map.insert(block_id, node_id);
        if let Err(e) = self.increase_allocated_memory(self.block_size) {
            // Admission failed, undo it. The new block is removed and
            // its buffer freed, so the counter drops back with it.
            self.decrease_allocated_memory(self.block_size);
            self.id_map.remove(&block_id);
            self.list.remove(node_id);
            return Err(e);
        }
        Ok((block_id, self.list.get_mut(node_id)))
    }

    /// Unpin the specified block, marking it as a candidate to spill
    /// when the cache grows past its ceiling. The block moves to the
    /// most-recently-used position, treating last release as the
    /// recency signal. Unpinning never spills by itself.
    #[inline]
    pub fn unpin_block(&mut self, block_id: BlockId) {
        let node_id = self.node_of(block_id);
        self.list.get_mut(node_id).unpin();
        self.list.move_to_front(node_id);
    }

    /// Returns true if the block is pinned.
    #[inline]
    pub fn block_is_pinned(&self, block_id: BlockId) -> bool {
        self.list.get(self.node_of(block_id)).is_pinned()
    }

    /// Fetch and pin the specified block, loading it from the secondary
    /// store if it had been spilled. Fetching a block that is already
    /// pinned leaves it pinned.
    #[inline]
    pub fn fetch_block(&mut self, block_id: BlockId) -> Result<&mut Block> {
        let node_id = self.node_of(block_id);
        if !self.list.get(node_id).is_resident() {
            let data = self.store.load(block_id)?;
            if data.len() != self.block_size {
                // Corrupt or foreign image, not a caller bug.
                return Err(Error::InvalidFormat);
            }
            self.list.get_mut(node_id).set_data(data);
            if let Err(e) = self.increase_allocated_memory(self.block_size) {
                // No room even after spilling, leave the block exactly
                // as it was. The persisted copy is still in the store.
                self.decrease_allocated_memory(self.block_size);
                drop(self.list.get_mut(node_id).release_data());
                return Err(e);
            }
            // The block is in memory again, discard the stale image so
            // the store only ever holds non-resident blocks. Best
            // effort: a leftover image is overwritten by the next spill
            // and swept at worker startup.
            if let Err(e) = self.store.delete(block_id) {
                log::warn!("failed to delete stale image of block {}: {}", block_id, e);
            }
            log::debug!("loaded block {} from spill store", block_id);
        }
        let block = self.list.get_mut(node_id);
        if !block.is_pinned() {
            block.pin();
        }
        self.list.move_to_front(node_id);
        Ok(self.list.get_mut(node_id))
    }

    /// The large temp table owning this block is done with it. Release
    /// all resources associated with the block, resident or spilled,
    /// regardless of pin state.
    #[inline]
    pub fn release_block(&mut self, block_id: BlockId) -> Result<()> {
        let node_id = match self.id_map.remove(&block_id) {
            Some(node_id) => node_id,
            None => panic!("unknown block id {}", block_id),
        };
        let block = self.list.remove(node_id);
        if block.is_resident() {
            self.decrease_allocated_memory(self.block_size);
            Ok(())
        } else {
            self.store.delete(block_id)
        }
    }

    /// Release every block, resident or spilled. Used when the owning
    /// table set shuts down. Teardown is best-effort: every entry is
    /// removed even if deleting a spilled image fails, and the first
    /// storage error is returned afterwards.
    pub fn release_all_blocks(&mut self) -> Result<()> {
        let mut first_err = None;
        let entries: Vec<(NodeId, BlockId)> =
            self.list.iter().map(|(node_id, b)| (node_id, b.id())).collect();
        for (node_id, block_id) in entries {
            self.id_map.remove(&block_id);
            let block = self.list.remove(node_id);
            if block.is_resident() {
                self.decrease_allocated_memory(self.block_size);
            } else if let Err(e) = self.store.delete(block_id) {
                log::warn!("failed to delete spilled block {}: {}", block_id, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        debug_assert!(self.total_allocated == 0);
        debug_assert!(self.id_map.is_empty());
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Report an increase in the amount of memory in use by blocks of
    /// this cache, spilling unpinned blocks until the total fits the
    /// ceiling again. On failure the counter stays increased and the
    /// caller owns the rollback of its own allocation.
    #[inline]
    pub fn increase_allocated_memory(&mut self, num_bytes: usize) -> Result<()> {
        self.total_allocated += num_bytes;
        while self.total_allocated > self.max_cache_size {
            self.store_a_block()?;
        }
        Ok(())
    }

    /// Report a decrease in the amount of memory in use by blocks of
    /// this cache, as when a block buffer is freed or detached.
    #[inline]
    pub fn decrease_allocated_memory(&mut self, num_bytes: usize) {
        debug_assert!(self.total_allocated >= num_bytes);
        self.total_allocated -= num_bytes;
    }

    /// The number of pinned entries, i.e. blocks currently being
    /// inserted into or scanned.
    #[inline]
    pub fn num_pinned_entries(&self) -> usize {
        self.list.iter().filter(|(_, b)| b.is_pinned()).count()
    }

    /// The number of blocks that are cached in memory, as opposed to
    /// spilled to secondary storage.
    #[inline]
    pub fn resident_block_count(&self) -> usize {
        self.list.iter().filter(|(_, b)| b.is_resident()).count()
    }

    /// The total number of large temp table blocks, both cached in
    /// memory and spilled.
    #[inline]
    pub fn total_block_count(&self) -> usize {
        self.list.len()
    }

    /// The number of bytes, tuple memory and outlined pool memory
    /// together, in blocks that are cached in memory.
    #[inline]
    pub fn allocated_memory(&self) -> usize {
        self.total_allocated
    }

    /// The max size the cache can grow to. Inserting a tuple or
    /// allocating a new block past this amount spills an unpinned block.
    #[inline]
    pub fn max_cache_size_in_bytes(&self) -> usize {
        self.max_cache_size
    }

    /// The fixed size of every block in this cache.
    #[inline]
    pub fn block_size_in_bytes(&self) -> usize {
        self.block_size
    }

    /// Return a string containing useful debug information.
    pub fn debug(&self) -> String {
        let mut s = format!(
            "BlockCache allocated={}/{} blocks={} resident={} pinned={}\n",
            self.total_allocated,
            self.max_cache_size,
            self.total_block_count(),
            self.resident_block_count(),
            self.num_pinned_entries(),
        );
        for (_, block) in self.list.iter() {
            let _ = writeln!(
                s,
                "  block {} owner={} {} {} tuples={} tuple_mem={} pool_mem={}",
                block.id(),
                block.owner(),
                if block.is_resident() { "resident" } else { "spilled" },
                if block.is_pinned() { "pinned" } else { "unpinned" },
                block.active_tuple_count(),
                block.allocated_tuple_memory(),
                block.allocated_pool_memory(),
            );
        }
        s
    }

    // Spill the least recently used unpinned resident block.
    fn store_a_block(&mut self) -> Result<()> {
        let victim = self
            .list
            .iter_rev()
            .find(|(_, b)| b.is_resident() && !b.is_pinned())
            .map(|(node_id, b)| (node_id, b.id()));
        let (node_id, block_id) = match victim {
            Some(victim) => victim,
            None => {
                log::warn!(
                    "block cache over budget with all blocks pinned: allocated={} max={}",
                    self.total_allocated,
                    self.max_cache_size
                );
                return Err(Error::InsufficientMemory(self.total_allocated));
            }
        };
        let data = self.list.get_mut(node_id).release_data();
        if let Err(e) = self.store.persist(block_id, &data) {
            // The block keeps its bytes and stays resident, the spill
            // attempt changed nothing.
            self.list.get_mut(node_id).set_data(data);
            return Err(e);
        }
        drop(data);
        self.decrease_allocated_memory(self.block_size);
        log::debug!("spilled block {}", block_id);
        Ok(())
    }

    // This at some point may need to be unique across the entire
    // process.
    #[inline]
    fn next_id(&mut self) -> BlockId {
        let block_id = self.next_block_id;
        self.next_block_id += 1;
        block_id
    }

    #[inline]
    fn node_of(&self, block_id: BlockId) -> NodeId {
        match self.id_map.get(&block_id) {
            Some(&node_id) => node_id,
            None => panic!("unknown block id {}", block_id),
        }
    }
}

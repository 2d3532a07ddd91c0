use crate::buf::BlockBuf;
use crate::error::Result;

pub type BlockId = u64;
pub const INVALID_BLOCK_ID: BlockId = !0;

/// Id of the large temp table a block belongs to.
/// Kept on the block for attribution only, the cache never uses it to
/// drive the block lifecycle.
pub type TableId = u64;

/// Block is a wrapper around one fixed-capacity buffer used to store
/// tuples of a large temp table.
///
/// The lower-addressed part of the buffer stores tuples of fixed size,
/// similar to persistent table blocks. The higher-addressed part stores
/// outlined variable-length objects referenced by the tuples. As tuples
/// are inserted both regions grow towards the middle, and the block is
/// full when the gap between the two insertion cursors cannot hold the
/// next request.
///
/// This layout is chosen so the whole block can be written to secondary
/// storage as a self-contained unit and reloaded later. A reloaded block
/// may sit at a different address, so references to outlined data inside
/// the tuples must be rewritten by the tuple layer. The cursors are kept
/// as offsets and survive detach/reattach, and together with the data
/// accessors they expose everything that fix-up needs.
pub struct Block {
    id: BlockId,
    owner: TableId,
    /// Block storage. None if the block has been spilled.
    data: Option<BlockBuf>,
    block_size: usize,
    /// Offset where the next tuple will be inserted.
    tuple_offset: usize,
    /// Offset one past the most recently inserted outlined object.
    /// Grows downward from the end of the buffer.
    outlined_offset: usize,
    /// True if this block cannot be evicted from the cache.
    pinned: bool,
    tuple_count: u64,
}

impl Block {
    /// Create a new resident block with an empty zeroed buffer.
    #[inline]
    pub(crate) fn new(id: BlockId, owner: TableId, block_size: usize) -> Result<Self> {
        let data = BlockBuf::zeroed(block_size)?;
        Ok(Block {
            id,
            owner,
            data: Some(data),
            block_size,
            tuple_offset: 0,
            outlined_offset: block_size,
            pinned: false,
            tuple_count: 0,
        })
    }

    /// Returns the unique id of this block.
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the id of the owning large temp table.
    #[inline]
    pub fn owner(&self) -> TableId {
        self.owner
    }

    /// Insert another tuple into this block.
    ///
    /// Returns false without mutation if the gap between the two regions
    /// cannot hold the tuple, in which case the caller requests a new
    /// block from the cache.
    #[inline]
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> bool {
        assert!(self.pinned, "insert into unpinned block");
        let data = match self.data.as_mut() {
            Some(data) => data,
            None => panic!("insert into non-resident block"),
        };
        if tuple.len() > self.outlined_offset - self.tuple_offset {
            return false;
        }
        let offset = self.tuple_offset;
        data.as_bytes_mut()[offset..offset + tuple.len()].copy_from_slice(tuple);
        self.tuple_offset += tuple.len();
        self.tuple_count += 1;
        true
    }

    /// Reserve size bytes from the outlined-object region and return the
    /// reserved slice. Outlined objects referenced by tuples live in the
    /// same block, so the block functions like a pool.
    ///
    /// Returns None without mutation when the gap between the two
    /// regions is exhausted.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<&mut [u8]> {
        assert!(self.pinned, "allocate on unpinned block");
        let data = match self.data.as_mut() {
            Some(data) => data,
            None => panic!("allocate on non-resident block"),
        };
        if size > self.outlined_offset - self.tuple_offset {
            return None;
        }
        self.outlined_offset -= size;
        let offset = self.outlined_offset;
        Some(&mut data.as_bytes_mut()[offset..offset + size])
    }

    /// Returns the amount of memory occupied by this block: the full
    /// block size when resident and zero otherwise. This may differ from
    /// tuple memory plus pool memory because of unused space between the
    /// two regions.
    #[inline]
    pub fn allocated_memory(&self) -> usize {
        if self.is_resident() {
            self.block_size
        } else {
            0
        }
    }

    /// Returns the number of bytes used to store tuples in this block.
    #[inline]
    pub fn allocated_tuple_memory(&self) -> usize {
        self.tuple_offset
    }

    /// Returns the number of bytes used to store outlined objects in
    /// this block.
    #[inline]
    pub fn allocated_pool_memory(&self) -> usize {
        self.block_size - self.outlined_offset
    }

    /// Returns free space between the two insertion cursors.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.outlined_offset - self.tuple_offset
    }

    /// Release the storage associated with this block so it can be
    /// persisted to secondary storage. Cursor bookkeeping is retained,
    /// so a later set_data restores the block without a separate
    /// reconstruction step.
    #[inline]
    pub fn release_data(&mut self) -> BlockBuf {
        match self.data.take() {
            Some(data) => data,
            None => panic!("release data of non-resident block"),
        }
    }

    /// Set the storage associated with this block, as when reloading
    /// from secondary storage.
    #[inline]
    pub fn set_data(&mut self, data: BlockBuf) {
        assert!(self.data.is_none(), "set data of resident block");
        assert!(data.len() == self.block_size, "block buffer size mismatch");
        self.data = Some(data);
    }

    /// Restore cursor bookkeeping, as when rebuilding a block object
    /// around bytes reloaded from secondary storage.
    #[inline]
    pub fn restore_cursors(&mut self, tuple_offset: usize, outlined_offset: usize, tuple_count: u64) {
        assert!(tuple_offset <= outlined_offset && outlined_offset <= self.block_size);
        self.tuple_offset = tuple_offset;
        self.outlined_offset = outlined_offset;
        self.tuple_count = tuple_count;
    }

    /// Mark this block as pinned and un-evictable.
    #[inline]
    pub fn pin(&mut self) {
        assert!(!self.pinned, "pin of pinned block");
        self.pinned = true;
    }

    /// Mark this block as unpinned and evictable.
    #[inline]
    pub fn unpin(&mut self) {
        assert!(self.pinned, "unpin of unpinned block");
        self.pinned = false;
    }

    /// Returns true if this block is pinned in the cache and may not be
    /// spilled, i.e. tuples are currently being inserted into it or
    /// scanned from it.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Returns true if this block is currently loaded into memory.
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the number of tuples in this block.
    #[inline]
    pub fn active_tuple_count(&self) -> u64 {
        self.tuple_count
    }

    /// Returns the ordinal position of the next free tuple slot in this
    /// block.
    #[inline]
    pub fn unused_tuple_boundary(&self) -> u64 {
        self.tuple_count
    }

    /// Returns the offset where the next tuple will be inserted.
    #[inline]
    pub fn tuple_offset(&self) -> usize {
        self.tuple_offset
    }

    /// Returns the offset of the most recently inserted outlined object.
    #[inline]
    pub fn outlined_offset(&self) -> usize {
        self.outlined_offset
    }

    /// Returns reference to the block bytes, or None if the block has
    /// been spilled.
    #[inline]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_ref().map(|d| d.as_bytes())
    }

    /// Returns mutable reference to the block bytes, or None if the
    /// block has been spilled.
    #[inline]
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.data.as_mut().map(|d| d.as_bytes_mut())
    }
}

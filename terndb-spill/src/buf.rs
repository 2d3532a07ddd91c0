use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

pub const SECTOR_SIZE: usize = 4096;

/// Align given input length to storage sector size.
#[inline]
pub fn align_to_sector_size(len: usize) -> usize {
    (len + SECTOR_SIZE - 1) / SECTOR_SIZE * SECTOR_SIZE
}

/// BlockBuf is the storage of a single large temp table block.
///
/// The buffer is allocated with sector-size alignment so spill writes
/// can go through direct IO. It is exclusively owned: detaching a block
/// moves the buffer out, reattaching moves it back in, and the bytes are
/// never copied in between.
pub struct BlockBuf {
    ptr: NonNull<u8>,
    len: usize,
}

impl BlockBuf {
    /// Create a new buffer with all bytes initialized to zero.
    /// Length must be a positive multiple of sector size.
    #[inline]
    pub fn zeroed(len: usize) -> Result<Self> {
        debug_assert!(len > 0 && len % SECTOR_SIZE == 0);
        let layout =
            Layout::from_size_align(len, SECTOR_SIZE).map_err(|_| Error::InvalidArgument)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(BlockBuf { ptr, len }),
            None => Err(Error::InsufficientMemory(len)),
        }
    }

    /// Create a new buffer holding a copy of given data.
    #[inline]
    pub fn with_data(data: &[u8]) -> Result<Self> {
        let mut buf = Self::zeroed(data.len())?;
        buf.as_bytes_mut().copy_from_slice(data);
        Ok(buf)
    }

    /// Returns length of this buffer.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns reference to underlying byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Returns mutable reference to underlying byte slice.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for BlockBuf {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, SECTOR_SIZE);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

unsafe impl Send for BlockBuf {}

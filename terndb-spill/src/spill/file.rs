use crate::block::BlockId;
use crate::buf::{BlockBuf, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::spill::SpillStore;
use glob::glob;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};

/// File-backed spill store with one file per block.
///
/// The complete file name pattern is:
/// <file-prefix>.<block-id>
/// e.g. ltt.block.42
/// Each file holds the raw block bytes followed by a CRC32 trailer in
/// little endian, which is verified on load.
pub struct FileSpillStore {
    file_prefix: String,
}

impl FileSpillStore {
    /// Create a spill store with given file prefix. The parent
    /// directory is created if missing, and stale spill files left
    /// behind by a previous worker are removed.
    pub fn new(file_prefix: impl Into<String>) -> Result<Self> {
        let file_prefix = file_prefix.into();
        if let Some(dir) = Path::new(&file_prefix).parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let store = FileSpillStore { file_prefix };
        store.remove_stale_files()?;
        Ok(store)
    }

    #[inline]
    fn file_name(&self, block_id: BlockId) -> String {
        format!("{}.{}", self.file_prefix, block_id)
    }

    fn remove_stale_files(&self) -> Result<()> {
        let stale = list_spill_files(&self.file_prefix)?;
        for file_path in stale {
            log::debug!("removing stale spill file {}", file_path.display());
            fs::remove_file(file_path)?;
        }
        Ok(())
    }
}

impl SpillStore for FileSpillStore {
    fn persist(&mut self, block_id: BlockId, data: &BlockBuf) -> Result<()> {
        let checksum = crc32fast::hash(data.as_bytes());
        let mut file = File::create(self.file_name(block_id))?;
        file.write_all(data.as_bytes())?;
        file.write_all(&checksum.to_le_bytes())?;
        Ok(())
    }

    fn load(&mut self, block_id: BlockId) -> Result<BlockBuf> {
        let file_name = self.file_name(block_id);
        let mut file = match File::open(&file_name) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::BlockNotFound(block_id));
            }
            Err(e) => return Err(Error::from(e)),
        };
        let file_len = file.metadata()?.len() as usize;
        let trailer_len = mem::size_of::<u32>();
        if file_len < trailer_len + SECTOR_SIZE {
            return Err(Error::InvalidFormat);
        }
        let data_len = file_len - trailer_len;
        if data_len % SECTOR_SIZE != 0 {
            return Err(Error::InvalidFormat);
        }
        let mut data = BlockBuf::zeroed(data_len)?;
        file.read_exact(data.as_bytes_mut())?;
        let mut trailer = [0u8; 4];
        file.read_exact(&mut trailer)?;
        if crc32fast::hash(data.as_bytes()) != u32::from_le_bytes(trailer) {
            return Err(Error::ChecksumMismatch);
        }
        Ok(data)
    }

    fn delete(&mut self, block_id: BlockId) -> Result<()> {
        match fs::remove_file(self.file_name(block_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::BlockNotFound(block_id)),
            Err(e) => Err(Error::from(e)),
        }
    }
}

/// List spill files with given prefix.
#[inline]
pub fn list_spill_files(file_prefix: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}.*", file_prefix);
    let mut res = vec![];
    for entry in glob(&pattern).map_err(|_| Error::InvalidArgument)? {
        res.push(entry?);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    const BLOCK_SIZE: usize = SECTOR_SIZE;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "terndb_spill_{}_{}",
                tag,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&dir);
            TempDir(dir)
        }

        fn prefix(&self) -> String {
            self.0.join("ltt.block").to_string_lossy().to_string()
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn test_image() -> BlockBuf {
        let data: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i * 7) as u8).collect();
        BlockBuf::with_data(&data).unwrap()
    }

    #[test]
    fn test_file_spill_store_round_trip() {
        let dir = TempDir::new("round_trip");
        let mut store = FileSpillStore::new(dir.prefix()).unwrap();
        let buf = test_image();
        store.persist(5, &buf).unwrap();
        let loaded = store.load(5).unwrap();
        assert_eq!(loaded.as_bytes(), buf.as_bytes());
        // The persisted image survives a load.
        let loaded = store.load(5).unwrap();
        assert_eq!(loaded.as_bytes(), buf.as_bytes());
        store.delete(5).unwrap();
        assert!(matches!(store.load(5), Err(Error::BlockNotFound(5))));
        assert!(matches!(store.delete(5), Err(Error::BlockNotFound(5))));
    }

    #[test]
    fn test_file_spill_store_checksum_mismatch() {
        let dir = TempDir::new("checksum");
        let mut store = FileSpillStore::new(dir.prefix()).unwrap();
        store.persist(1, &test_image()).unwrap();
        // Flip one byte in the middle of the image.
        let file_name = format!("{}.1", dir.prefix());
        let mut image = fs::read(&file_name).unwrap();
        image[100] ^= 0xff;
        fs::write(&file_name, &image).unwrap();
        assert!(matches!(store.load(1), Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn test_file_spill_store_truncated_file() {
        let dir = TempDir::new("truncated");
        let mut store = FileSpillStore::new(dir.prefix()).unwrap();
        store.persist(2, &test_image()).unwrap();
        let file_name = format!("{}.2", dir.prefix());
        let file = OpenOptions::new().write(true).open(&file_name).unwrap();
        file.set_len(100).unwrap();
        assert!(matches!(store.load(2), Err(Error::InvalidFormat)));
    }

    #[test]
    fn test_file_spill_store_removes_stale_files() {
        let dir = TempDir::new("stale");
        {
            let mut store = FileSpillStore::new(dir.prefix()).unwrap();
            store.persist(7, &test_image()).unwrap();
            assert_eq!(list_spill_files(&dir.prefix()).unwrap().len(), 1);
        }
        // A new worker starting over the same prefix discards leftovers.
        let _store = FileSpillStore::new(dir.prefix()).unwrap();
        assert!(list_spill_files(&dir.prefix()).unwrap().is_empty());
    }
}

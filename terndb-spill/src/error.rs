use crate::block::BlockId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("insufficient memory({0})")]
    InsufficientMemory(usize),
    #[error("block cache size is too small")]
    CacheSizeTooSmall,
    #[error("spilled block {0} not found")]
    BlockNotFound(BlockId),
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("Invalid format")]
    InvalidFormat,
    #[error("IO Error")]
    IOError,
    #[error("glob error")]
    GlobError,
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(_src: std::io::Error) -> Self {
        Error::IOError
    }
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(_src: toml::de::Error) -> Self {
        Error::InvalidFormat
    }
}

impl From<glob::GlobError> for Error {
    #[inline]
    fn from(_src: glob::GlobError) -> Self {
        Error::GlobError
    }
}

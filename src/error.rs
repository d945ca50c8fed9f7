use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Open/seek/read failure on the image.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short read at offset {offset:#x}: wanted {expected} bytes, got {actual}")]
    ShortRead { offset: u64, expected: usize, actual: usize },

    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("no valid checkpoint superblock found in the descriptor area")]
    NoValidCheckpoint,

    #[error("volume {oid} not found in the container object map")]
    VolumeNotFound { oid: u64 },

    #[error("object {oid} not found")]
    ObjectNotFound { oid: u64 },

    #[error("value size mismatch: expected {expected} bytes, found {actual}")]
    ValueSizeMismatch { expected: usize, actual: usize },

    #[error("B-tree deeper than {max_depth} levels")]
    TreeTooDeep { max_depth: usize },

    #[error("corrupt structure: {0}")]
    Corrupt(String),

    #[error("checksum mismatch for object at {addr:#x}: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { addr: u64, stored: u64, computed: u64 },

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A previous (partial) run left this directory behind.
    #[error("directory already exists: {}", path.display())]
    DirectoryExists { path: PathBuf },

    #[error("couldn't open output file {}: {source}", path.display())]
    OutputFile { path: PathBuf, #[source] source: io::Error },

    #[error("input is neither an APFS container nor a UDIF disk image")]
    NotADiskImage,

    #[error("malformed disk image manifest: {0}")]
    Manifest(String),

    #[error("unsupported disk image chunk type {kind:#010x}")]
    UnsupportedChunk { kind: u32 },
}

impl Error {
    /// Fatal errors abort the whole run; everything else only abandons the
    /// current lookup, volume or subtree.
    pub const fn is_fatal(&self) -> bool {
        matches!{
            self,
            Self::Io(_) | Self::ShortRead { .. } | Self::NoValidCheckpoint |
            Self::DirectoryExists { .. } | Self::OutputFile { .. } |
            Self::NotADiskImage | Self::UnsupportedChunk { .. }
        }
    }

    #[inline]
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

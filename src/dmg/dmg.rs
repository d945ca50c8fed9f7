use std::fmt::{self, Display};

// ─── UDIF trailer ("koly"), big-endian, last 512 bytes of the image ─────────

pub const UDIF_TRAILER_SIZE: usize         = 512;
pub const UDIF_KOLY_MAGIC: u32             = 0x6B6F6C79; // 'koly'
pub const UDIF_SECTOR_SIZE: u64            = 512;

pub const UDIF_KOLY_VERSION_OFFSET: usize        = 4;
pub const UDIF_KOLY_HEADER_SIZE_OFFSET: usize    = 8;
pub const UDIF_KOLY_FLAGS_OFFSET: usize          = 12;
pub const UDIF_KOLY_DATA_FORK_OFFSET: usize      = 24;
pub const UDIF_KOLY_DATA_FORK_LEN_OFFSET: usize  = 32;
pub const UDIF_KOLY_RSRC_FORK_OFFSET: usize      = 40;
pub const UDIF_KOLY_RSRC_FORK_LEN_OFFSET: usize  = 48;
pub const UDIF_KOLY_XML_OFFSET: usize            = 216;
pub const UDIF_KOLY_XML_LEN_OFFSET: usize        = 224;
pub const UDIF_KOLY_IMAGE_VARIANT_OFFSET: usize  = 488;
pub const UDIF_KOLY_SECTOR_COUNT_OFFSET: usize   = 492;

// ─── Block table ("mish"), big-endian, base64 inside the plist ──────────────

pub const UDIF_MISH_MAGIC: u32               = 0x6D697368; // 'mish'
pub const UDIF_MISH_SECTOR_NUMBER_OFFSET: usize = 8;
pub const UDIF_MISH_SECTOR_COUNT_OFFSET: usize  = 16;
pub const UDIF_MISH_DATA_OFFSET_OFFSET: usize   = 24;
pub const UDIF_MISH_CHUNK_COUNT_OFFSET: usize   = 200;
pub const UDIF_MISH_CHUNKS_OFFSET: usize        = 204;

pub const UDIF_CHUNK_ZERO: u32       = 0x0000_0000;
pub const UDIF_CHUNK_RAW: u32        = 0x0000_0001;
pub const UDIF_CHUNK_IGNORE: u32     = 0x0000_0002;
pub const UDIF_CHUNK_ADC: u32        = 0x8000_0004;
pub const UDIF_CHUNK_ZLIB: u32       = 0x8000_0005;
pub const UDIF_CHUNK_BZIP2: u32      = 0x8000_0006;
pub const UDIF_CHUNK_LZFSE: u32      = 0x8000_0007;
pub const UDIF_CHUNK_COMMENT: u32    = 0x7FFF_FFFE;
pub const UDIF_CHUNK_TERMINATOR: u32 = 0xFFFF_FFFF;

/// Partitions whose name contains this hold an APFS container.
pub const APFS_PARTITION_MARKER: &str = "Apple_APFS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KolyTrailer {
    pub version:          u32,
    pub header_size:      u32,
    pub flags:            u32,
    pub data_fork_offset: u64,
    pub data_fork_length: u64,
    pub rsrc_fork_offset: u64,
    pub rsrc_fork_length: u64,
    pub xml_offset:       u64,
    pub xml_length:       u64,
    pub image_variant:    u32,
    pub sector_count:     u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Zero,
    Raw,
    Ignore,
    Zlib,
    Adc,
    Bzip2,
    Lzfse,
    Comment,
    Terminator,
    Unknown(u32),
}

impl ChunkKind {
    pub const fn from_raw(kind: u32) -> Self {
        match kind {
            UDIF_CHUNK_ZERO       => Self::Zero,
            UDIF_CHUNK_RAW        => Self::Raw,
            UDIF_CHUNK_IGNORE     => Self::Ignore,
            UDIF_CHUNK_ZLIB       => Self::Zlib,
            UDIF_CHUNK_ADC        => Self::Adc,
            UDIF_CHUNK_BZIP2      => Self::Bzip2,
            UDIF_CHUNK_LZFSE      => Self::Lzfse,
            UDIF_CHUNK_COMMENT    => Self::Comment,
            UDIF_CHUNK_TERMINATOR => Self::Terminator,
            other                 => Self::Unknown(other),
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Zero       => UDIF_CHUNK_ZERO,
            Self::Raw        => UDIF_CHUNK_RAW,
            Self::Ignore     => UDIF_CHUNK_IGNORE,
            Self::Zlib       => UDIF_CHUNK_ZLIB,
            Self::Adc        => UDIF_CHUNK_ADC,
            Self::Bzip2      => UDIF_CHUNK_BZIP2,
            Self::Lzfse      => UDIF_CHUNK_LZFSE,
            Self::Comment    => UDIF_CHUNK_COMMENT,
            Self::Terminator => UDIF_CHUNK_TERMINATOR,
            Self::Unknown(k) => k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub kind:              ChunkKind,
    pub comment:           u32,
    /// Output position, in sectors from the partition start
    pub sector:            u64,
    pub sector_count:      u64,
    /// Input position, relative to the data fork + table data offset
    pub compressed_offset: u64,
    pub compressed_length: u64,
}

impl Chunk {
    /// `None` when the sector overflows a byte offset.
    #[inline(always)]
    pub const fn out_offset(&self) -> Option<u64> {
        self.sector.checked_mul(UDIF_SECTOR_SIZE)
    }

    #[inline(always)]
    pub const fn out_length(&self) -> Option<u64> {
        self.sector_count.checked_mul(UDIF_SECTOR_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTable {
    pub sector_number: u64,
    pub sector_count:  u64,
    pub data_offset:   u64,
    pub chunks:        Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub name:  String,
    pub table: BlockTable,
}

impl Partition {
    #[inline]
    pub fn is_apfs(&self) -> bool {
        self.name.contains(APFS_PARTITION_MARKER)
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Partition {}: {}", self.index, self.name)?;
        writeln!(f, "  Start sector:  {}", self.table.sector_number)?;
        writeln!(f, "  Sector count:  {}", self.table.sector_count)?;
        writeln!(f, "  Chunks:        {}", self.table.chunks.len())
    }
}

pub mod raw {
    use bytemuck::{Pod, Zeroable};

    // ── BLKXChunkEntry (big-endian) ─────────────────────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct BlkxChunk {
        pub entry_type:        u32, // 0x00
        pub comment:           u32, // 0x04
        pub sector_number:     u64, // 0x08
        pub sector_count:      u64, // 0x10
        pub compressed_offset: u64, // 0x18
        pub compressed_length: u64, // 0x20
    }
}

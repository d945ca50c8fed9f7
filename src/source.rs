//! Explicit-offset byte sources and the block reader built on top of them.
//!
//! Nothing here keeps a cursor: every read names its absolute offset, so any
//! number of walks may share one source.

use crate::apfs::{raw, ObjHeader, APFS_OBJ_HDR_SIZE};
use crate::apfs::checksum;
use crate::error::{Error, Result};
use crate::tracy;

use std::fs::File;
use std::io;
use std::mem;

use bytemuck::Pod;
use memmap2::Mmap;

pub trait ByteSource {
    /// Read up to `buf.len()` bytes at `offset`; returns the count read
    /// (0 past the end).
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn size(&self) -> io::Result<u64>;
}

impl ByteSource for [u8] {
    #[inline]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else { return Ok(0) };
        if start >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    #[inline(always)]
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ByteSource for Vec<u8> {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }

    #[inline(always)]
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ByteSource for Mmap {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self[..].read_at(buf, offset)
    }

    #[inline(always)]
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ByteSource for File {
    #[inline]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        crate::util::read_at_offset(self, buf, offset)
    }

    #[inline]
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Verify the Fletcher-64 checksum of every object read through
    /// [`BlockReader::read_object`].
    pub verify_checksums: bool,
}

pub struct BlockReader<S> {
    source:           S,
    block_size:       u32,
    verify_checksums: bool,
}

impl<S: ByteSource> BlockReader<S> {
    #[inline]
    pub fn new(source: S, block_size: u32, opts: ReaderOptions) -> Self {
        Self { source, block_size, verify_checksums: opts.verify_checksums }
    }

    #[inline(always)]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline(always)]
    pub const fn verifies_checksums(&self) -> bool {
        self.verify_checksums
    }

    #[inline(always)]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[inline(always)]
    pub fn set_block_size(&mut self, block_size: u32) {
        self.block_size = block_size;
    }

    /// Byte offset of physical block `paddr`.  Block numbers come straight
    /// off disk, so one that overflows the address space is corruption.
    #[inline]
    pub fn block_offset(&self, paddr: u64) -> Result<u64> {
        paddr.checked_mul(self.block_size as u64).ok_or_else(|| {
            Error::corrupt(format!("block {paddr} lies past the addressable range"))
        })
    }

    #[inline(always)]
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        read_exact_at(&self.source, buf, offset)
    }

    /// Read one whole block by physical block number.
    pub fn read_block(&self, paddr: u64) -> Result<Vec<u8>> {
        let _span = tracy::span!("BlockReader::read_block");

        let mut block = vec![0u8; self.block_size as usize];
        self.read_exact_at(&mut block, self.block_offset(paddr)?)?;
        Ok(block)
    }

    /// Read an object block at byte address `addr`, checking its checksum
    /// when verification is enabled.
    pub fn read_object(&self, addr: u64) -> Result<Vec<u8>> {
        let _span = tracy::span!("BlockReader::read_object");

        let mut block = vec![0u8; self.block_size as usize];
        self.read_exact_at(&mut block, addr)?;

        if self.verify_checksums {
            let stored = checksum::stored(&block);
            let computed = checksum::fletcher64(&block);
            if stored != computed {
                return Err(Error::ChecksumMismatch { addr, stored, computed });
            }
        }

        Ok(block)
    }

    /// Read a fixed-layout record at an absolute byte offset.
    pub fn read_pod<T: Pod>(&self, offset: u64) -> Result<T> {
        let mut buf = vec![0u8; mem::size_of::<T>()];
        self.read_exact_at(&mut buf, offset)?;
        Ok(bytemuck::pod_read_unaligned(&buf))
    }

    #[inline]
    pub fn read_header(&self, offset: u64) -> Result<ObjHeader> {
        debug_assert_eq!(mem::size_of::<raw::ObjPhys>(), APFS_OBJ_HDR_SIZE);
        let raw = self.read_pod::<raw::ObjPhys>(offset)?;
        Ok(ObjHeader::from_raw(&raw))
    }
}

/// Fill `buf` from `offset`, failing with [`Error::ShortRead`] at the end of
/// the source.
pub fn read_exact_at<S: ByteSource + ?Sized>(source: &S, buf: &mut [u8], offset: u64) -> Result<()> {
    if offset.checked_add(buf.len() as u64).is_none() {
        return Err(Error::corrupt(format!("{} byte read at {offset:#x} overflows", buf.len())));
    }

    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            return Err(Error::ShortRead { offset, expected: buf.len(), actual: filled });
        }
        filled += n;
    }
    Ok(())
}

/// Decode a fixed-layout record out of a block buffer, bounds-checked.
#[inline]
pub fn pod_at<T: Pod>(buf: &[u8], offset: usize) -> Result<T> {
    let size = mem::size_of::<T>();
    match offset.checked_add(size).and_then(|end| buf.get(offset..end)) {
        Some(bytes) => Ok(bytemuck::pod_read_unaligned(bytes)),
        None => Err(Error::corrupt(format!(
            "record of {size} bytes at {offset:#x} overruns a {} byte buffer", buf.len()
        ))),
    }
}

//! Input detection and the `.dmg` unwrap step.

use crate::apfs::parser::looks_like_container;
use crate::dmg::parser::{has_koly_trailer, DiskImage};
use crate::dmg::Partition;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::tracy;

use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Raw APFS container, NX superblock in block 0
    Apfs,
    /// UDIF disk image with a trailing koly block
    Udif,
}

impl ImageKind {
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Apfs => "APFS container",
            Self::Udif => "UDIF disk image",
        }
    }
}

pub fn detect<S: ByteSource + ?Sized>(source: &S) -> Result<ImageKind> {
    if looks_like_container(source)? {
        Ok(ImageKind::Apfs)
    } else if has_koly_trailer(source)? {
        Ok(ImageKind::Udif)
    } else {
        Err(Error::NotADiskImage)
    }
}

/// `<stem>.partition<N>.img`, next to wherever we run.
pub fn default_image_out(image: &Path, part: &Partition) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_owned());
    PathBuf::from(format!("{stem}.partition{}.img", part.index))
}

/// The partition to unwrap: the first one holding an APFS container.
#[inline]
pub fn apfs_partition<S: ByteSource>(dmg: &DiskImage<S>) -> Result<&Partition> {
    dmg.apfs_partition()
        .ok_or_else(|| Error::Unsupported("disk image has no Apple_APFS partition".into()))
}

/// Write `part` of `dmg` to `out_path` as a flat image; returns its length.
pub fn unwrap_udif<S: ByteSource>(dmg: &DiskImage<S>, part: &Partition, out_path: &Path) -> Result<u64> {
    let _span = tracy::span!("image::unwrap_udif");

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(out_path)
        .map_err(|source| Error::OutputFile { path: out_path.to_path_buf(), source })?;

    let mut out = BufWriter::new(file);
    let len = dmg.inflate_partition(part, &mut out)?;

    log::info!("partition {} ({}) unwrapped to {}: {len} bytes", part.index, part.name, out_path.display());
    Ok(len)
}

#[inline]
pub fn map_file(file: &File) -> Result<Mmap> {
    // SAFETY: the image is opened read-only and nothing in this process
    // writes to it while the mapping lives.
    let mmap = unsafe { Mmap::map(file)? };
    Ok(mmap)
}

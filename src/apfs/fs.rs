//! Filesystem-record decoding.
//!
//! Every fs-tree key starts with a j_key_t whose top nibble is the record
//! type; only inodes, directory entries and file extents carry anything the
//! walker materializes.

use crate::error::{Error, Result};
use crate::source::pod_at;
use crate::util::{cstr_lossy, read_u16_le, read_u32_le};

use super::*;

use std::mem;

/// Split a j_key_t into (object id, record type).
#[inline]
pub fn split_key(key: &[u8]) -> Result<(u64, u8)> {
    let hdr: raw::JKey = pod_at(key, 0)?;
    let v = u64::from_le(hdr.obj_id_and_type);
    Ok((v & APFS_OBJ_ID_MASK, ((v & APFS_OBJ_TYPE_MASK) >> APFS_OBJ_TYPE_SHIFT) as u8))
}

#[inline(always)]
pub const fn make_key_header(obj_id: u64, kind: u8) -> u64 {
    (obj_id & APFS_OBJ_ID_MASK) | ((kind as u64) << APFS_OBJ_TYPE_SHIFT)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataStream {
    pub size:                u64,
    pub alloced_size:        u64,
    pub default_crypto_id:   u64,
    pub total_bytes_written: u64,
    pub total_bytes_read:    u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inode {
    pub obj_id:            u64,
    pub parent_id:         u64,
    pub private_id:        u64,
    pub create_time:       u64,
    pub mod_time:          u64,
    pub change_time:       u64,
    pub access_time:       u64,
    pub internal_flags:    u64,
    pub nchildren_or_nlink: u32,
    pub bsd_flags:         u32,
    pub owner:             u32,
    pub group:             u32,
    pub mode:              u16,
    pub uncompressed_size: u64,
    /// From the INO_EXT_TYPE_NAME extended field
    pub name:              Option<String>,
    /// From the INO_EXT_TYPE_DSTREAM extended field
    pub dstream:           Option<DataStream>,
}

impl Inode {
    #[inline(always)]
    pub const fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[inline(always)]
    pub const fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Logical size of the default data stream (0 without one).
    #[inline]
    pub fn size(&self) -> u64 {
        self.dstream.map_or(0, |d| d.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode of the directory holding this entry
    pub parent_id:  u64,
    pub name:       String,
    pub file_id:    u64,
    pub date_added: u64,
    pub flags:      u16,
}

impl DirEntry {
    #[inline(always)]
    pub const fn file_type(&self) -> u8 {
        (self.flags & APFS_DREC_TYPE_MASK) as u8
    }

    #[inline(always)]
    pub const fn is_dir(&self) -> bool {
        self.file_type() == DT_DIR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileExtent {
    /// Owning data stream (the file's private id)
    pub obj_id:       u64,
    pub logical_addr: u64,
    pub length:       u64,
    pub flags:        u8,
    pub phys_block:   u64,
    pub crypto_id:    u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsRecord {
    Inode(Inode),
    DirEntry(DirEntry),
    FileExtent(FileExtent),
    /// Decoded only far enough to name it
    Xattr { obj_id: u64, name: String },
    Other { obj_id: u64, kind: u8 },
}

pub fn decode_record(key: &[u8], value: &[u8]) -> Result<FsRecord> {
    let (obj_id, kind) = split_key(key)?;

    match kind {
        APFS_TYPE_INODE     => decode_inode(obj_id, value).map(FsRecord::Inode),
        APFS_TYPE_DIR_REC   => decode_dir_entry(obj_id, key, value).map(FsRecord::DirEntry),
        APFS_TYPE_FILE_EXTENT => decode_file_extent(obj_id, key, value).map(FsRecord::FileExtent),
        APFS_TYPE_XATTR     => decode_xattr_name(key).map(|name| FsRecord::Xattr { obj_id, name }),
        _                   => Ok(FsRecord::Other { obj_id, kind }),
    }
}

pub fn decode_inode(obj_id: u64, value: &[u8]) -> Result<Inode> {
    let v: raw::JInodeVal = pod_at(value, 0)?;

    let mut inode = Inode {
        obj_id,
        parent_id:          u64::from_le(v.parent_id),
        private_id:         u64::from_le(v.private_id),
        create_time:        u64::from_le(v.create_time),
        mod_time:           u64::from_le(v.mod_time),
        change_time:        u64::from_le(v.change_time),
        access_time:        u64::from_le(v.access_time),
        internal_flags:     u64::from_le(v.internal_flags),
        nchildren_or_nlink: u32::from_le(v.nchildren_or_nlink),
        bsd_flags:          u32::from_le(v.bsd_flags),
        owner:              u32::from_le(v.owner),
        group:              u32::from_le(v.group),
        mode:               u16::from_le(v.mode),
        uncompressed_size:  u64::from_le(v.uncompressed_size),
        name:               None,
        dstream:            None,
    };

    let xfields = &value[mem::size_of::<raw::JInodeVal>()..];
    if !xfields.is_empty() {
        for (x_type, data) in XFields::new(xfields)? {
            match x_type {
                APFS_INO_EXT_TYPE_NAME => inode.name = Some(cstr_lossy(data)),
                APFS_INO_EXT_TYPE_DSTREAM => {
                    let d: raw::JDstream = pod_at(data, 0)?;
                    inode.dstream = Some(DataStream {
                        size:                u64::from_le(d.size),
                        alloced_size:        u64::from_le(d.alloced_size),
                        default_crypto_id:   u64::from_le(d.default_crypto_id),
                        total_bytes_written: u64::from_le(d.total_bytes_written),
                        total_bytes_read:    u64::from_le(d.total_bytes_read),
                    });
                }
                other => log::trace!("inode {obj_id}: skipping xfield type {other}"),
            }
        }
    }

    Ok(inode)
}

/// Iterator over an xf_blob_t: headers first, then 8-byte aligned payloads.
struct XFields<'a> {
    blob:     &'a [u8],
    count:    usize,
    index:    usize,
    data_off: usize,
}

impl<'a> XFields<'a> {
    fn new(blob: &'a [u8]) -> Result<Self> {
        let hdr: raw::XfBlob = pod_at(blob, 0)?;
        let count = u16::from_le(hdr.xf_num_exts) as usize;
        let data_off = mem::size_of::<raw::XfBlob>() + count * mem::size_of::<raw::XField>();
        if data_off > blob.len() {
            return Err(Error::corrupt(format!("xfield blob too short for {count} headers")));
        }
        Ok(Self { blob, count, index: 0, data_off })
    }
}

impl<'a> Iterator for XFields<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let at = mem::size_of::<raw::XfBlob>() + self.index * mem::size_of::<raw::XField>();
        let xf: raw::XField = pod_at(self.blob, at).ok()?;
        self.index += 1;

        let size = u16::from_le(xf.x_size) as usize;
        let data = self.blob.get(self.data_off..self.data_off + size)?;
        self.data_off += size.next_multiple_of(APFS_XF_ALIGN);
        Some((xf.x_type, data))
    }
}

pub fn decode_dir_entry(parent_id: u64, key: &[u8], value: &[u8]) -> Result<DirEntry> {
    if key.len() < APFS_DREC_KEY_HDR_SIZE {
        return Err(Error::ValueSizeMismatch { expected: APFS_DREC_KEY_HDR_SIZE, actual: key.len() });
    }

    let name_len_and_hash = read_u32_le(key, 8);
    let stored_len = (name_len_and_hash & APFS_DREC_LEN_MASK) as usize;
    let name_bytes = &key[APFS_DREC_KEY_HDR_SIZE..];
    if stored_len != name_bytes.len() {
        log::debug!(
            "dir entry in {parent_id}: stored name length {stored_len}, key holds {}",
            name_bytes.len()
        );
    }

    let v: raw::JDrecVal = pod_at(value, 0)?;

    Ok(DirEntry {
        parent_id,
        name:       cstr_lossy(name_bytes),
        file_id:    u64::from_le(v.file_id),
        date_added: u64::from_le(v.date_added),
        flags:      u16::from_le(v.flags),
    })
}

pub fn decode_file_extent(obj_id: u64, key: &[u8], value: &[u8]) -> Result<FileExtent> {
    let k: raw::JFileExtentKey = pod_at(key, 0)?;
    let v: raw::JFileExtentVal = pod_at(value, 0)?;
    let len_and_flags = u64::from_le(v.len_and_flags);

    Ok(FileExtent {
        obj_id,
        logical_addr: u64::from_le(k.logical_addr),
        length:       len_and_flags & APFS_FILE_EXTENT_LEN_MASK,
        flags:        ((len_and_flags & APFS_FILE_EXTENT_FLAG_MASK) >> APFS_FILE_EXTENT_FLAG_SHIFT) as u8,
        phys_block:   u64::from_le(v.phys_block_num),
        crypto_id:    u64::from_le(v.crypto_id),
    })
}

pub fn decode_xattr_name(key: &[u8]) -> Result<String> {
    if key.len() < APFS_XATTR_KEY_HDR_SIZE {
        return Err(Error::ValueSizeMismatch { expected: APFS_XATTR_KEY_HDR_SIZE, actual: key.len() });
    }
    let len = read_u16_le(key, 8) as usize;
    let end = (APFS_XATTR_KEY_HDR_SIZE + len).min(key.len());
    Ok(cstr_lossy(&key[APFS_XATTR_KEY_HDR_SIZE..end]))
}

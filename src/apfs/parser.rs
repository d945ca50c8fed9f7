//! APFS container façade.
//!
//! Supports:
//!   - Container superblock (NX) parsing and checkpoint recovery
//!   - Container and volume object-map lookup (OID → physical block)
//!   - Volume superblock (APSB) parsing
//!   - Full fs-record B-tree walks materialized through a [`Materializer`]
//!
//! Not supported:
//!   - Non-contiguous checkpoint descriptor areas
//!   - Snapshots / reverting to older transaction epochs
//!   - Encrypted volumes

use crate::error::{Error, Result};
use crate::materialize::Materializer;
use crate::source::{BlockReader, ByteSource, ReaderOptions};
use crate::tracy;
use crate::util::{cstr_lossy, read_u16_le, read_u32_le, read_u64_le};

use super::checkpoint::{self, Checkpoint};
use super::volume::{Volume, VolumeResolver};
use super::walker::{self, WalkSummary};
use super::*;

// ─────────────────────────────────────────────────────────────────────────────
// Superblock decoding
// ─────────────────────────────────────────────────────────────────────────────

#[inline]
fn uuid_at(data: &[u8], offset: usize) -> [u8; 16] {
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&data[offset..offset + 16]);
    uuid
}

/// Parse an NX (container) superblock out of `data`.
///
/// `data` only needs to cover the decoded prefix of the block, so block 0 can
/// be parsed before the block size is known.
pub fn parse_container_superblock(data: &[u8]) -> Result<ContainerSuperblock> {
    let _span = tracy::span!("parse_container_superblock");

    if data.len() < APFS_NX_DECODED_SIZE {
        return Err(Error::corrupt(format!(
            "{} bytes is too small for an NX superblock", data.len()
        )));
    }

    let magic = read_u32_le(data, APFS_NX_MAGIC_OFFSET);
    if magic != APFS_NX_MAGIC {
        return Err(Error::BadMagic { expected: APFS_NX_MAGIC, found: magic });
    }

    let raw: raw::ObjPhys = crate::source::pod_at(data, 0)?;

    let block_size = read_u32_le(data, APFS_NX_BLOCK_SIZE_OFFSET);
    if !block_size.is_power_of_two()
        || !(APFS_NX_MIN_BLOCK_SIZE..=APFS_NX_MAX_BLOCK_SIZE).contains(&block_size)
    {
        return Err(Error::corrupt(format!("invalid APFS block size {block_size}")));
    }

    let max_file_systems = read_u32_le(data, APFS_NX_MAX_FILE_SYSTEMS_OFFSET);
    let fs_oids = (0..APFS_NX_MAX_FILE_SYSTEMS)
        .map(|i| read_u64_le(data, APFS_NX_FS_OID_OFFSET + i * 8))
        .collect();

    Ok(ContainerSuperblock {
        header:             ObjHeader::from_raw(&raw),
        block_size,
        block_count:        read_u64_le(data, APFS_NX_BLOCK_COUNT_OFFSET),
        features:           read_u64_le(data, APFS_NX_FEATURES_OFFSET),
        ro_compat_features: read_u64_le(data, APFS_NX_RO_FEATURES_OFFSET),
        incompat_features:  read_u64_le(data, APFS_NX_INCOMPAT_FEATURES_OFFSET),
        uuid:               uuid_at(data, APFS_NX_UUID_OFFSET),
        next_oid:           read_u64_le(data, APFS_NX_NEXT_OID_OFFSET),
        next_xid:           read_u64_le(data, APFS_NX_NEXT_XID_OFFSET),
        xp_desc_blocks:     read_u32_le(data, APFS_NX_XP_DESC_BLOCKS_OFFSET),
        xp_data_blocks:     read_u32_le(data, APFS_NX_XP_DATA_BLOCKS_OFFSET),
        xp_desc_base:       read_u64_le(data, APFS_NX_XP_DESC_BASE_OFFSET),
        xp_data_base:       read_u64_le(data, APFS_NX_XP_DATA_BASE_OFFSET),
        xp_desc_next:       read_u32_le(data, APFS_NX_XP_DESC_NEXT_OFFSET),
        xp_data_next:       read_u32_le(data, APFS_NX_XP_DATA_NEXT_OFFSET),
        xp_desc_index:      read_u32_le(data, APFS_NX_XP_DESC_INDEX_OFFSET),
        xp_desc_len:        read_u32_le(data, APFS_NX_XP_DESC_LEN_OFFSET),
        xp_data_index:      read_u32_le(data, APFS_NX_XP_DATA_INDEX_OFFSET),
        xp_data_len:        read_u32_le(data, APFS_NX_XP_DATA_LEN_OFFSET),
        spaceman_oid:       read_u64_le(data, APFS_NX_SPACEMAN_OID_OFFSET),
        omap_oid:           read_u64_le(data, APFS_NX_OMAP_OID_OFFSET),
        reaper_oid:         read_u64_le(data, APFS_NX_REAPER_OID_OFFSET),
        max_file_systems,
        fs_oids,
        flags:              read_u64_le(data, APFS_NX_FLAGS_OFFSET),
        efi_jumpstart:      read_u64_le(data, APFS_NX_EFI_JUMPSTART_OFFSET),
        fusion_uuid:        uuid_at(data, APFS_NX_FUSION_UUID_OFFSET),
    })
}

/// Parse an APSB (volume) superblock.
pub fn parse_volume_superblock(data: &[u8]) -> Result<VolumeSuperblock> {
    let _span = tracy::span!("parse_volume_superblock");

    if data.len() < APFS_APSB_DECODED_SIZE {
        return Err(Error::corrupt(format!(
            "{} bytes is too small for a volume superblock", data.len()
        )));
    }

    let magic = read_u32_le(data, APFS_APSB_MAGIC_OFFSET);
    if magic != APFS_APSB_MAGIC {
        return Err(Error::BadMagic { expected: APFS_APSB_MAGIC, found: magic });
    }

    let raw: raw::ObjPhys = crate::source::pod_at(data, 0)?;

    Ok(VolumeSuperblock {
        header:              ObjHeader::from_raw(&raw),
        fs_index:            read_u32_le(data, APFS_APSB_FS_INDEX_OFFSET),
        features:            read_u64_le(data, APFS_APSB_FEATURES_OFFSET),
        ro_compat_features:  read_u64_le(data, APFS_APSB_RO_FEATURES_OFFSET),
        incompat_features:   read_u64_le(data, APFS_APSB_INCOMPAT_FEATURES_OFFSET),
        unmount_time:        read_u64_le(data, APFS_APSB_UNMOUNT_TIME_OFFSET),
        reserve_block_count: read_u64_le(data, APFS_APSB_RESERVE_BLOCKS_OFFSET),
        quota_block_count:   read_u64_le(data, APFS_APSB_QUOTA_BLOCKS_OFFSET),
        alloc_count:         read_u64_le(data, APFS_APSB_ALLOC_COUNT_OFFSET),
        root_tree_type:      read_u32_le(data, APFS_APSB_ROOT_TREE_TYPE_OFFSET),
        extentref_tree_type: read_u32_le(data, APFS_APSB_EXTENTREF_TREE_TYPE_OFFSET),
        snap_meta_tree_type: read_u32_le(data, APFS_APSB_SNAP_META_TREE_TYPE_OFFSET),
        omap_oid:            read_u64_le(data, APFS_APSB_OMAP_OID_OFFSET),
        root_tree_oid:       read_u64_le(data, APFS_APSB_ROOT_TREE_OID_OFFSET),
        extentref_tree_oid:  read_u64_le(data, APFS_APSB_EXTENTREF_TREE_OID_OFFSET),
        snap_meta_tree_oid:  read_u64_le(data, APFS_APSB_SNAP_META_TREE_OID_OFFSET),
        next_obj_id:         read_u64_le(data, APFS_APSB_NEXT_OBJ_ID_OFFSET),
        num_files:           read_u64_le(data, APFS_APSB_NUM_FILES_OFFSET),
        num_directories:     read_u64_le(data, APFS_APSB_NUM_DIRECTORIES_OFFSET),
        num_symlinks:        read_u64_le(data, APFS_APSB_NUM_SYMLINKS_OFFSET),
        num_other_fsobjects: read_u64_le(data, APFS_APSB_NUM_OTHER_OFFSET),
        num_snapshots:       read_u64_le(data, APFS_APSB_NUM_SNAPSHOTS_OFFSET),
        uuid:                uuid_at(data, APFS_APSB_VOL_UUID_OFFSET),
        last_mod_time:       read_u64_le(data, APFS_APSB_LAST_MOD_TIME_OFFSET),
        fs_flags:            read_u64_le(data, APFS_APSB_FS_FLAGS_OFFSET),
        name:                cstr_lossy(&data[APFS_APSB_VOLNAME_OFFSET..APFS_APSB_VOLNAME_OFFSET + APFS_VOLNAME_LEN]),
        role:                read_u16_le(data, APFS_APSB_ROLE_OFFSET),
    })
}

/// True if `source` carries the NX magic where block 0 should have it.
pub fn looks_like_container<S: ByteSource + ?Sized>(source: &S) -> Result<bool> {
    let mut magic = [0u8; 4];
    let n = source.read_at(&mut magic, APFS_NX_MAGIC_OFFSET as u64)?;
    Ok(n == magic.len() && u32::from_le_bytes(magic) == APFS_NX_MAGIC)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public façade
// ─────────────────────────────────────────────────────────────────────────────

/// An opened APFS container positioned at its newest checkpoint.
pub struct ApfsContainer<S> {
    pub reader:     BlockReader<S>,
    pub checkpoint: Checkpoint,
}

impl<S: ByteSource> ApfsContainer<S> {
    pub fn open(source: S, opts: ReaderOptions) -> Result<Self> {
        let _span = tracy::span!("ApfsContainer::open");

        let mut reader = BlockReader::new(source, APFS_NX_MIN_BLOCK_SIZE, opts);

        let mut head = vec![0u8; APFS_NX_DECODED_SIZE];
        reader.read_exact_at(&mut head, 0)?;
        let block_zero = parse_container_superblock(&head)?;
        reader.set_block_size(block_zero.block_size);

        log::debug!(
            "container: block size {}, {} blocks",
            block_zero.block_size, block_zero.block_count
        );

        let checkpoint = checkpoint::find_latest(&reader)?;
        if checkpoint.superblock.block_size != block_zero.block_size {
            return Err(Error::corrupt(format!(
                "checkpoint block size {} disagrees with block 0 ({})",
                checkpoint.superblock.block_size, block_zero.block_size
            )));
        }

        Ok(Self { reader, checkpoint })
    }

    #[inline(always)]
    pub fn superblock(&self) -> &ContainerSuperblock {
        &self.checkpoint.superblock
    }

    #[inline(always)]
    pub fn block_size(&self) -> u32 {
        self.reader.block_size()
    }

    #[inline]
    pub fn volumes(&self) -> Result<VolumeResolver<'_, S>> {
        VolumeResolver::new(&self.reader, self.superblock())
    }

    /// Walk `volume`'s fs tree, replaying it into `materializer`.
    #[inline]
    pub fn walk_volume<M: Materializer>(&self, volume: &Volume, materializer: &mut M) -> Result<WalkSummary> {
        walker::walk_volume(&self.reader, volume, materializer)
    }
}

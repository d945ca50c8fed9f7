use std::fmt::{self, Display};

pub type ObjId = u64;
pub type Xid = u64;

// ─── Object header (obj_phys_t) ──────────────────────────────────────────────

/// Every APFS object starts with a 32-byte object header (obj_phys_t)
pub const APFS_OBJ_HDR_SIZE: usize         = 32;
pub const APFS_OBJ_CKSUM_SIZE: usize       = 8;

pub const APFS_OBJECT_TYPE_MASK: u32       = 0x0000_FFFF;
pub const APFS_OBJECT_TYPE_FLAGS_MASK: u32 = 0xFFFF_0000;

pub const APFS_OBJ_TYPE_NX_SUPERBLOCK: u16 = 0x0001;
pub const APFS_OBJ_TYPE_BTREE: u16         = 0x0002;
pub const APFS_OBJ_TYPE_BTREE_NODE: u16    = 0x0003;
pub const APFS_OBJ_TYPE_OMAP: u16          = 0x000B;
pub const APFS_OBJ_TYPE_CHECKPOINT_MAP: u16 = 0x000C;
pub const APFS_OBJ_TYPE_FS: u16            = 0x000D; // volume superblock
pub const APFS_OBJ_TYPE_FSTREE: u16        = 0x000E;

pub const APFS_OBJ_PHYSICAL: u32           = 0x4000_0000;

// ─── Container Superblock (nx_superblock_t) ─────────────────────────────────

pub const APFS_NX_MAGIC: u32                = 0x4253584E; // 'NXSB'
pub const APFS_NX_MAX_FILE_SYSTEMS: usize   = 100;
pub const APFS_NX_MIN_BLOCK_SIZE: u32       = 4096;
pub const APFS_NX_MAX_BLOCK_SIZE: u32       = 65536;

/// Byte offsets inside the container superblock block
pub const APFS_NX_MAGIC_OFFSET: usize             = 32;
pub const APFS_NX_BLOCK_SIZE_OFFSET: usize        = 36;
pub const APFS_NX_BLOCK_COUNT_OFFSET: usize       = 40;
pub const APFS_NX_FEATURES_OFFSET: usize          = 48;
pub const APFS_NX_RO_FEATURES_OFFSET: usize       = 56;
pub const APFS_NX_INCOMPAT_FEATURES_OFFSET: usize = 64;
pub const APFS_NX_UUID_OFFSET: usize              = 72;
pub const APFS_NX_NEXT_OID_OFFSET: usize          = 88;
pub const APFS_NX_NEXT_XID_OFFSET: usize          = 96;
pub const APFS_NX_XP_DESC_BLOCKS_OFFSET: usize    = 104;
pub const APFS_NX_XP_DATA_BLOCKS_OFFSET: usize    = 108;
pub const APFS_NX_XP_DESC_BASE_OFFSET: usize      = 112;
pub const APFS_NX_XP_DATA_BASE_OFFSET: usize      = 120;
pub const APFS_NX_XP_DESC_NEXT_OFFSET: usize      = 128;
pub const APFS_NX_XP_DATA_NEXT_OFFSET: usize      = 132;
pub const APFS_NX_XP_DESC_INDEX_OFFSET: usize     = 136;
pub const APFS_NX_XP_DESC_LEN_OFFSET: usize       = 140;
pub const APFS_NX_XP_DATA_INDEX_OFFSET: usize     = 144;
pub const APFS_NX_XP_DATA_LEN_OFFSET: usize       = 148;
pub const APFS_NX_SPACEMAN_OID_OFFSET: usize      = 152;
pub const APFS_NX_OMAP_OID_OFFSET: usize          = 160;
pub const APFS_NX_REAPER_OID_OFFSET: usize        = 168;
pub const APFS_NX_MAX_FILE_SYSTEMS_OFFSET: usize  = 180;
pub const APFS_NX_FS_OID_OFFSET: usize            = 184; // __le64 nx_fs_oid[100]
pub const APFS_NX_FLAGS_OFFSET: usize             = 1264;
pub const APFS_NX_EFI_JUMPSTART_OFFSET: usize     = 1272;
pub const APFS_NX_FUSION_UUID_OFFSET: usize       = 1280;
/// Everything we decode lives below this offset
pub const APFS_NX_DECODED_SIZE: usize             = 1296;

/// High bit of nx_xp_desc_blocks: descriptor area is a B-tree, not a ring
pub const APFS_NX_XP_DESC_NONCONTIGUOUS: u32 = 0x8000_0000;

// ─── Volume Superblock (apfs_superblock_t) ───────────────────────────────────

pub const APFS_APSB_MAGIC: u32             = 0x42535041; // 'APSB'
pub const APFS_VOLNAME_LEN: usize          = 256;

pub const APFS_APSB_MAGIC_OFFSET: usize              = 32;
pub const APFS_APSB_FS_INDEX_OFFSET: usize           = 36;
pub const APFS_APSB_FEATURES_OFFSET: usize           = 40;
pub const APFS_APSB_RO_FEATURES_OFFSET: usize        = 48;
pub const APFS_APSB_INCOMPAT_FEATURES_OFFSET: usize  = 56;
pub const APFS_APSB_UNMOUNT_TIME_OFFSET: usize       = 64;
pub const APFS_APSB_RESERVE_BLOCKS_OFFSET: usize     = 72;
pub const APFS_APSB_QUOTA_BLOCKS_OFFSET: usize       = 80;
pub const APFS_APSB_ALLOC_COUNT_OFFSET: usize        = 88;
pub const APFS_APSB_ROOT_TREE_TYPE_OFFSET: usize     = 116;
pub const APFS_APSB_EXTENTREF_TREE_TYPE_OFFSET: usize = 120;
pub const APFS_APSB_SNAP_META_TREE_TYPE_OFFSET: usize = 124;
pub const APFS_APSB_OMAP_OID_OFFSET: usize           = 128; // __le64 apfs_omap_oid
pub const APFS_APSB_ROOT_TREE_OID_OFFSET: usize      = 136; // __le64 apfs_root_tree_oid
pub const APFS_APSB_EXTENTREF_TREE_OID_OFFSET: usize = 144;
pub const APFS_APSB_SNAP_META_TREE_OID_OFFSET: usize = 152;
pub const APFS_APSB_NEXT_OBJ_ID_OFFSET: usize        = 176;
pub const APFS_APSB_NUM_FILES_OFFSET: usize          = 184;
pub const APFS_APSB_NUM_DIRECTORIES_OFFSET: usize    = 192;
pub const APFS_APSB_NUM_SYMLINKS_OFFSET: usize       = 200;
pub const APFS_APSB_NUM_OTHER_OFFSET: usize          = 208;
pub const APFS_APSB_NUM_SNAPSHOTS_OFFSET: usize      = 216;
pub const APFS_APSB_VOL_UUID_OFFSET: usize           = 240;
pub const APFS_APSB_LAST_MOD_TIME_OFFSET: usize      = 256;
pub const APFS_APSB_FS_FLAGS_OFFSET: usize           = 264;
pub const APFS_APSB_VOLNAME_OFFSET: usize            = 704;
pub const APFS_APSB_ROLE_OFFSET: usize               = 964;
pub const APFS_APSB_DECODED_SIZE: usize              = 968;

// ─── B-tree node (btree_node_phys_t) ─────────────────────────────────────────

/// Table of contents always starts right after obj header (32) + btn header (24)
pub const APFS_BTNODE_TOC_START: usize     = 56;

pub const APFS_BTNODE_ROOT: u16            = 0x0001;
pub const APFS_BTNODE_LEAF: u16            = 0x0002;
pub const APFS_BTNODE_FIXED_KV_SIZE: u16   = 0x0004;

/// Trailing btree_info_t reserved at the end of every root node
pub const APFS_BTREE_INFO_SIZE: usize      = 40;

/// Child pointers stored in internal nodes are plain oids
pub const APFS_BTREE_CHILD_OID_SIZE: usize = 8;

// ─── Object map (omap_phys_t / omap_key_t / omap_val_t) ─────────────────────

pub const APFS_OMAP_KEY_OID_SIZE: usize    = 8;  // ok_oid only, ok_xid unconstrained
pub const APFS_OMAP_VAL_SIZE: usize        = 16; // flags (4) + size (4) + paddr (8)

// ─── File-system record keys (j_key_t) ───────────────────────────────────────

pub const APFS_OBJ_ID_MASK: u64            = 0x0FFF_FFFF_FFFF_FFFF;
pub const APFS_OBJ_TYPE_MASK: u64          = 0xF000_0000_0000_0000;
pub const APFS_OBJ_TYPE_SHIFT: u32         = 60;

pub const APFS_TYPE_ANY: u8                = 0;
pub const APFS_TYPE_SNAP_METADATA: u8      = 1;
pub const APFS_TYPE_EXTENT: u8             = 2;
pub const APFS_TYPE_INODE: u8              = 3;
pub const APFS_TYPE_XATTR: u8              = 4;
pub const APFS_TYPE_SIBLING_LINK: u8       = 5;
pub const APFS_TYPE_DSTREAM_ID: u8         = 6;
pub const APFS_TYPE_CRYPTO_STATE: u8       = 7;
pub const APFS_TYPE_FILE_EXTENT: u8        = 8;
pub const APFS_TYPE_DIR_REC: u8            = 9;
pub const APFS_TYPE_DIR_STATS: u8          = 10;
pub const APFS_TYPE_SNAP_NAME: u8          = 11;
pub const APFS_TYPE_SIBLING_MAP: u8        = 12;
pub const APFS_TYPE_FILE_INFO: u8          = 13;

/// j_drec_hashed_key_t: j_key_t (8) + name_len_and_hash (4), name follows
pub const APFS_DREC_KEY_HDR_SIZE: usize    = 12;
pub const APFS_DREC_LEN_MASK: u32          = 0x0000_03FF;
pub const APFS_DREC_TYPE_MASK: u16         = 0x000F;

/// j_xattr_key_t: j_key_t (8) + name_len (2), name follows
pub const APFS_XATTR_KEY_HDR_SIZE: usize   = 10;

pub const APFS_FILE_EXTENT_LEN_MASK: u64   = 0x00FF_FFFF_FFFF_FFFF;
pub const APFS_FILE_EXTENT_FLAG_MASK: u64  = 0xFF00_0000_0000_0000;
pub const APFS_FILE_EXTENT_FLAG_SHIFT: u32 = 56;

// ─── Inode extended fields ───────────────────────────────────────────────────

pub const APFS_INO_EXT_TYPE_NAME: u8       = 4;
pub const APFS_INO_EXT_TYPE_DSTREAM: u8    = 8;
pub const APFS_XF_ALIGN: usize             = 8;

// ─── Well-known inode numbers ───────────────────────────────────────────────

pub const APFS_ROOT_DIR_PARENT: u64        = 1;
pub const APFS_ROOT_DIR_INO_NUM: u64       = 2;
pub const APFS_PRIV_DIR_INO_NUM: u64       = 3;

// ─── Mode bits / directory entry types ──────────────────────────────────────

pub const S_IFMT: u16  = 0xF000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFLNK: u16 = 0xA000;

pub const DT_UNKNOWN: u8 = 0;
pub const DT_DIR: u8     = 4;
pub const DT_REG: u8     = 8;
pub const DT_LNK: u8     = 10;

// ─── High-level parsed structures ────────────────────────────────────────────

/// Decoded obj_phys_t.  The checksum is carried along but only checked when
/// the reader was asked to verify checksums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjHeader {
    pub checksum: u64,
    pub oid:      ObjId,
    pub xid:      Xid,
    pub o_type:   u32,
    pub subtype:  u32,
}

impl ObjHeader {
    #[inline(always)]
    pub fn from_raw(raw: &raw::ObjPhys) -> Self {
        Self {
            checksum: u64::from_le_bytes(raw.o_cksum),
            oid:      u64::from_le(raw.o_oid),
            xid:      u64::from_le(raw.o_xid),
            o_type:   u32::from_le(raw.o_type),
            subtype:  u32::from_le(raw.o_subtype),
        }
    }

    #[inline(always)]
    pub const fn block_type(&self) -> u16 {
        (self.o_type & APFS_OBJECT_TYPE_MASK) as u16
    }

    #[inline(always)]
    pub const fn flags(&self) -> u16 {
        ((self.o_type & APFS_OBJECT_TYPE_FLAGS_MASK) >> 16) as u16
    }

    #[inline(always)]
    pub const fn is_superblock(&self) -> bool {
        self.block_type() == APFS_OBJ_TYPE_NX_SUPERBLOCK
    }
}

impl Display for ObjHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checksum:              {:#018x}", self.checksum)?;
        writeln!(f, "Block ID:              {}", self.oid)?;
        writeln!(f, "Version/TransactionID: {}", self.xid)?;
        writeln!(f, "Block Type:            {:#x}", self.block_type())?;
        writeln!(f, "Flags:                 {:#x}", self.flags())?;
        writeln!(f, "Sub Type:              {:#x}", self.subtype)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSuperblock {
    pub header:              ObjHeader,
    /// Block size in bytes (always a power of two, default 4096)
    pub block_size:          u32,
    pub block_count:         u64,
    pub features:            u64,
    pub ro_compat_features:  u64,
    pub incompat_features:   u64,
    pub uuid:                [u8; 16],
    pub next_oid:            u64,
    pub next_xid:            Xid,
    /// Raw nx_xp_desc_blocks, including the non-contiguous flag bit
    pub xp_desc_blocks:      u32,
    pub xp_data_blocks:      u32,
    pub xp_desc_base:        u64,
    pub xp_data_base:        u64,
    pub xp_desc_next:        u32,
    pub xp_data_next:        u32,
    pub xp_desc_index:       u32,
    pub xp_desc_len:         u32,
    pub xp_data_index:       u32,
    pub xp_data_len:         u32,
    pub spaceman_oid:        ObjId,
    /// Physical address of the container omap_phys_t
    pub omap_oid:            ObjId,
    pub reaper_oid:          ObjId,
    pub max_file_systems:    u32,
    /// Virtual oids of the volume superblocks, zero-terminated
    pub fs_oids:             Vec<ObjId>,
    pub flags:               u64,
    pub efi_jumpstart:       u64,
    pub fusion_uuid:         [u8; 16],
}

impl ContainerSuperblock {
    /// Number of blocks in the checkpoint descriptor ring
    #[inline(always)]
    pub const fn desc_block_count(&self) -> u32 {
        self.xp_desc_blocks & !APFS_NX_XP_DESC_NONCONTIGUOUS
    }

    #[inline(always)]
    pub const fn desc_is_contiguous(&self) -> bool {
        self.xp_desc_blocks & APFS_NX_XP_DESC_NONCONTIGUOUS == 0
    }

    /// Volume oids up to (not including) the first zero entry
    #[inline]
    pub fn volume_oids(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.fs_oids.iter().copied().take_while(|&oid| oid != 0)
    }
}

impl Display for ContainerSuperblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        writeln!(f, "Magic Number:          NXSB")?;
        writeln!(f, "Block size:            {} bytes", self.block_size)?;
        writeln!(f, "Blocks count:          {}", self.block_count)?;
        writeln!(f, "Features:              {:#x}", self.features)?;
        writeln!(f, "ReadOnly features:     {:#x}", self.ro_compat_features)?;
        writeln!(f, "Incompatible features: {:#x}", self.incompat_features)?;
        writeln!(f, "UUID:                  {}", Uuid(&self.uuid))?;
        writeln!(f, "Next OID:              {}", self.next_oid)?;
        writeln!(f, "Next XID:              {}", self.next_xid)?;
        writeln!(f, "Descriptor blocks:     {}", self.desc_block_count())?;
        writeln!(f, "Data blocks:           {}", self.xp_data_blocks)?;
        writeln!(f, "Descriptor base:       {:#x}", self.xp_desc_base)?;
        writeln!(f, "Data base:             {:#x}", self.xp_data_base)?;
        writeln!(f, "Descriptor next/index/len: {}/{}/{}", self.xp_desc_next, self.xp_desc_index, self.xp_desc_len)?;
        writeln!(f, "Data next/index/len:   {}/{}/{}", self.xp_data_next, self.xp_data_index, self.xp_data_len)?;
        writeln!(f, "Space manager OID:     {}", self.spaceman_oid)?;
        writeln!(f, "Omap OID:              {}", self.omap_oid)?;
        writeln!(f, "Reaper OID:            {}", self.reaper_oid)?;
        writeln!(f, "Max volumes:           {}", self.max_file_systems)?;
        for (i, oid) in self.volume_oids().enumerate() {
            writeln!(f, "Volume OID [{i}]:       {oid}")?;
        }
        writeln!(f, "Flags:                 {:#x}", self.flags)?;
        writeln!(f, "EFI jumpstart:         {}", self.efi_jumpstart)?;
        writeln!(f, "Fusion UUID:           {}", Uuid(&self.fusion_uuid))
    }
}

#[derive(Debug, Clone)]
pub struct VolumeSuperblock {
    pub header:                ObjHeader,
    pub fs_index:              u32,
    pub features:              u64,
    pub ro_compat_features:    u64,
    pub incompat_features:     u64,
    pub unmount_time:          u64,
    pub reserve_block_count:   u64,
    pub quota_block_count:     u64,
    pub alloc_count:           u64,
    pub root_tree_type:        u32,
    pub extentref_tree_type:   u32,
    pub snap_meta_tree_type:   u32,
    /// Physical address of this volume's omap_phys_t
    pub omap_oid:              ObjId,
    /// Virtual oid of the fs-record B-tree root (resolved via the volume omap)
    pub root_tree_oid:         ObjId,
    pub extentref_tree_oid:    ObjId,
    pub snap_meta_tree_oid:    ObjId,
    pub next_obj_id:           u64,
    pub num_files:             u64,
    pub num_directories:       u64,
    pub num_symlinks:          u64,
    pub num_other_fsobjects:   u64,
    pub num_snapshots:         u64,
    pub uuid:                  [u8; 16],
    pub last_mod_time:         u64,
    pub fs_flags:              u64,
    pub name:                  String,
    pub role:                  u16,
}

impl Display for VolumeSuperblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        writeln!(f, "Magic Number:          APSB")?;
        writeln!(f, "FS index:              {}", self.fs_index)?;
        writeln!(f, "Features:              {:#x}", self.features)?;
        writeln!(f, "ReadOnly features:     {:#x}", self.ro_compat_features)?;
        writeln!(f, "Incompatible features: {:#x}", self.incompat_features)?;
        writeln!(f, "Unmount time:          {}", self.unmount_time)?;
        writeln!(f, "Reserved blocks:       {}", self.reserve_block_count)?;
        writeln!(f, "Quota blocks:          {}", self.quota_block_count)?;
        writeln!(f, "Allocated blocks:      {}", self.alloc_count)?;
        writeln!(f, "Root tree type:        {:#x}", self.root_tree_type)?;
        writeln!(f, "Extent-ref tree type:  {:#x}", self.extentref_tree_type)?;
        writeln!(f, "Snap meta tree type:   {:#x}", self.snap_meta_tree_type)?;
        writeln!(f, "Omap OID:              {}", self.omap_oid)?;
        writeln!(f, "Root tree OID:         {}", self.root_tree_oid)?;
        writeln!(f, "Extent-ref tree OID:   {}", self.extentref_tree_oid)?;
        writeln!(f, "Snap meta tree OID:    {}", self.snap_meta_tree_oid)?;
        writeln!(f, "Next object ID:        {}", self.next_obj_id)?;
        writeln!(f, "Files:                 {}", self.num_files)?;
        writeln!(f, "Directories:           {}", self.num_directories)?;
        writeln!(f, "Symlinks:              {}", self.num_symlinks)?;
        writeln!(f, "Other fs objects:      {}", self.num_other_fsobjects)?;
        writeln!(f, "Snapshots:             {}", self.num_snapshots)?;
        writeln!(f, "Volume UUID:           {}", Uuid(&self.uuid))?;
        writeln!(f, "Last modified:         {}", self.last_mod_time)?;
        writeln!(f, "FS flags:              {:#x}", self.fs_flags)?;
        writeln!(f, "Volume name:           {}", self.name)?;
        writeln!(f, "Role:                  {:#x}", self.role)
    }
}

/// Decoded omap_phys_t, only the parts needed to find the mapping tree
#[derive(Debug, Clone, Copy)]
pub struct ObjectMap {
    pub header:    ObjHeader,
    pub flags:     u32,
    pub tree_type: u32,
    /// Physical block of the omap B-tree root
    pub tree_oid:  ObjId,
}

struct Uuid<'a>(&'a [u8; 16]);

impl Display for Uuid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

pub mod raw {
    use bytemuck::{Pod, Zeroable};

    // ── obj_phys_t ──────────────────────────────────────────────────────────
    //
    // struct obj_phys_t {
    //     uint8_t  o_cksum[8];   // Fletcher-64 checksum
    //     uint64_t o_oid;        // object ID
    //     uint64_t o_xid;        // transaction ID
    //     uint32_t o_type;       // object type | flags
    //     uint32_t o_subtype;    // object sub-type
    // };
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct ObjPhys {
        pub o_cksum:   [u8; 8],  // 0x00
        pub o_oid:     u64,      // 0x08
        pub o_xid:     u64,      // 0x10
        pub o_type:    u32,      // 0x18
        pub o_subtype: u32,      // 0x1C
    }

    // ── btree_node_phys_t ───────────────────────────────────────────────────
    //
    // nloc_t = { uint16_t off; uint16_t len; }
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct BtreeNodePhys {
        pub btn_o:               ObjPhys,  // 0x00 – 32 bytes
        pub btn_flags:           u16,      // 0x20
        pub btn_level:           u16,      // 0x22
        pub btn_nkeys:           u32,      // 0x24
        pub btn_table_space_off: u16,      // 0x28
        pub btn_table_space_len: u16,      // 0x2A
        pub btn_free_space_off:  u16,      // 0x2C
        pub btn_free_space_len:  u16,      // 0x2E
        pub btn_key_free_off:    u16,      // 0x30
        pub btn_key_free_len:    u16,      // 0x32
        pub btn_val_free_off:    u16,      // 0x34
        pub btn_val_free_len:    u16,      // 0x36
        // btn_data[] follows at 0x38
    }

    // ── btree_info_t – trailer of every root node ──────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct BtreeInfo {
        pub bt_flags:       u32,
        pub bt_node_size:   u32,
        pub bt_key_size:    u32,
        pub bt_val_size:    u32,
        pub bt_longest_key: u32,
        pub bt_longest_val: u32,
        pub bt_key_count:   u64,
        pub bt_node_count:  u64,
    }

    // ── kvoff_t – ToC entry of fixed-size nodes ────────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct KvOff {
        pub k: u16,
        pub v: u16,
    }

    // ── kvloc_t – ToC entry of variable-size nodes ─────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct KvLoc {
        pub k_off: u16,
        pub k_len: u16,
        pub v_off: u16,
        pub v_len: u16,
    }

    // ── omap_phys_t ─────────────────────────────────────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct OmapPhys {
        pub om_o:                  ObjPhys,
        pub om_flags:              u32,
        pub om_snap_count:         u32,
        pub om_tree_type:          u32,
        pub om_snapshot_tree_type: u32,
        pub om_tree_oid:           u64,
        pub om_snapshot_tree_oid:  u64,
        pub om_most_recent_snap:   u64,
        pub om_pending_revert_min: u64,
        pub om_pending_revert_max: u64,
    }

    // ── omap_key_t / omap_val_t ─────────────────────────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct OmapKey {
        pub ok_oid: u64,
        pub ok_xid: u64,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct OmapVal {
        pub ov_flags: u32,
        pub ov_size:  u32,
        pub ov_paddr: u64,
    }

    // ── j_key_t – every fs-record key starts with this ─────────────────────
    //
    //   bits 63-60 = record type
    //   bits 59-0  = object ID
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct JKey {
        pub obj_id_and_type: u64,
    }

    // ── j_inode_val_t (packed on disk, xfields follow at 0x5C) ─────────────
    #[repr(C, packed)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct JInodeVal {
        pub parent_id:                u64, // 0x00
        pub private_id:               u64, // 0x08
        pub create_time:              u64, // 0x10  nanoseconds
        pub mod_time:                 u64, // 0x18
        pub change_time:              u64, // 0x20
        pub access_time:              u64, // 0x28
        pub internal_flags:           u64, // 0x30
        pub nchildren_or_nlink:       u32, // 0x38
        pub default_protection_class: u32, // 0x3C
        pub write_generation_counter: u32, // 0x40
        pub bsd_flags:                u32, // 0x44
        pub owner:                    u32, // 0x48
        pub group:                    u32, // 0x4C
        pub mode:                     u16, // 0x50
        pub pad1:                     u16, // 0x52
        pub uncompressed_size:        u64, // 0x54
    }

    // ── xf_blob_t / x_field_t ───────────────────────────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct XfBlob {
        pub xf_num_exts:  u16,
        pub xf_used_data: u16,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct XField {
        pub x_type:  u8,
        pub x_flags: u8,
        pub x_size:  u16,
    }

    // ── j_dstream_t ─────────────────────────────────────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct JDstream {
        pub size:                u64,
        pub alloced_size:        u64,
        pub default_crypto_id:   u64,
        pub total_bytes_written: u64,
        pub total_bytes_read:    u64,
    }

    // ── j_drec_val_t (packed, 18 bytes before xfields) ─────────────────────
    #[repr(C, packed)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct JDrecVal {
        pub file_id:    u64,  // 0x00
        pub date_added: u64,  // 0x08
        pub flags:      u16,  // 0x10  low 4 bits = file type
    }

    // ── j_file_extent_key_t / j_file_extent_val_t ──────────────────────────
    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct JFileExtentKey {
        pub hdr:          JKey,
        pub logical_addr: u64,
    }

    #[repr(C)]
    #[derive(Copy, Clone, Pod, Zeroable)]
    pub struct JFileExtentVal {
        pub len_and_flags:  u64,  // bits 55-0 = byte length, bits 63-56 = flags
        pub phys_block_num: u64,
        pub crypto_id:      u64,
    }
}

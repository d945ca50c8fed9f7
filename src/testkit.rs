//! In-memory APFS container synthesis for unit tests.

use crate::apfs::checksum;
use crate::apfs::fs::make_key_header;
use crate::apfs::*;
use crate::error::Result;
use crate::materialize::Materializer;
use crate::source::{BlockReader, ByteSource, ReaderOptions};

use std::mem;

pub const BS: usize = 4096;

// ─── Image ──────────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct Image {
    data: Vec<u8>,
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, block: u64, content: Vec<u8>) {
        assert_eq!(content.len(), BS);
        let at = block as usize * BS;
        if self.data.len() < at + BS {
            self.data.resize(at + BS, 0);
        }
        self.data[at..at + BS].copy_from_slice(&content);
    }

    pub fn corrupt_byte(&mut self, block: u64, offset: usize) {
        self.data[block as usize * BS + offset] ^= 0xA5;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn reader(&self) -> BlockReader<Vec<u8>> {
        self.reader_with(ReaderOptions::default())
    }

    pub fn reader_with(&self, opts: ReaderOptions) -> BlockReader<Vec<u8>> {
        BlockReader::new(self.data.clone(), BS as u32, opts)
    }
}

fn put_u16(b: &mut [u8], off: usize, v: u16) { b[off..off + 2].copy_from_slice(&v.to_le_bytes()) }
fn put_u32(b: &mut [u8], off: usize, v: u32) { b[off..off + 4].copy_from_slice(&v.to_le_bytes()) }
fn put_u64(b: &mut [u8], off: usize, v: u64) { b[off..off + 8].copy_from_slice(&v.to_le_bytes()) }

fn object(oid: u64, xid: u64, o_type: u16, subtype: u32) -> Vec<u8> {
    let mut b = vec![0u8; BS];
    put_u64(&mut b, 8, oid);
    put_u64(&mut b, 16, xid);
    put_u32(&mut b, 24, o_type as u32);
    put_u32(&mut b, 28, subtype);
    b
}

fn sealed(mut b: Vec<u8>) -> Vec<u8> {
    checksum::seal(&mut b);
    b
}

// ─── B-tree nodes ───────────────────────────────────────────────────────────

/// Lays entries out the way APFS does: ToC at 56, keys packed after it,
/// values packed backwards from the end (or from the root trailer).
pub struct NodeBuilder {
    oid:     u64,
    flags:   u16,
    level:   u16,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl NodeBuilder {
    pub fn leaf(oid: u64) -> Self {
        Self { oid, flags: APFS_BTNODE_LEAF, level: 0, entries: Vec::new() }
    }

    pub fn internal(oid: u64) -> Self {
        Self { oid, flags: 0, level: 1, entries: Vec::new() }
    }

    pub fn root(mut self) -> Self {
        self.flags |= APFS_BTNODE_ROOT;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.flags |= APFS_BTNODE_FIXED_KV_SIZE;
        self
    }

    pub fn entry(mut self, key: &[u8], value: &[u8]) -> Self {
        self.entries.push((key.to_vec(), value.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let is_root = self.flags & APFS_BTNODE_ROOT != 0;
        let is_fixed = self.flags & APFS_BTNODE_FIXED_KV_SIZE != 0;
        let o_type = if is_root { APFS_OBJ_TYPE_BTREE } else { APFS_OBJ_TYPE_BTREE_NODE };

        let mut b = object(self.oid, 1, o_type, 0);

        let entry_size = if is_fixed { 4 } else { 8 };
        let toc_len = (self.entries.len() * entry_size).next_multiple_of(8);
        let key_start = APFS_BTNODE_TOC_START + toc_len;
        let val_end = if is_root { BS - APFS_BTREE_INFO_SIZE } else { BS };

        put_u16(&mut b, 32, self.flags);
        put_u16(&mut b, 34, self.level);
        put_u32(&mut b, 36, self.entries.len() as u32);
        put_u16(&mut b, 40, 0);
        put_u16(&mut b, 42, toc_len as u16);

        let mut k_off = 0usize;
        let mut v_off = 0usize;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            b[key_start + k_off..key_start + k_off + k.len()].copy_from_slice(k);
            v_off += v.len();
            b[val_end - v_off..val_end - v_off + v.len()].copy_from_slice(v);

            let toc = APFS_BTNODE_TOC_START + i * entry_size;
            if is_fixed {
                put_u16(&mut b, toc, k_off as u16);
                put_u16(&mut b, toc + 2, v_off as u16);
            } else {
                put_u16(&mut b, toc, k_off as u16);
                put_u16(&mut b, toc + 2, k.len() as u16);
                put_u16(&mut b, toc + 4, v_off as u16);
                put_u16(&mut b, toc + 6, v.len() as u16);
            }
            k_off += k.len();
        }

        // free space between keys and values
        put_u16(&mut b, 44, k_off as u16);
        put_u16(&mut b, 46, (val_end - key_start - k_off - v_off) as u16);

        if is_root {
            let info = BS - APFS_BTREE_INFO_SIZE;
            put_u32(&mut b, info + 4, BS as u32);
            put_u64(&mut b, info + 24, self.entries.len() as u64);
            put_u64(&mut b, info + 32, 1);
        }

        sealed(b)
    }
}

// ─── Container objects ──────────────────────────────────────────────────────

pub struct NxLayout {
    pub xid:         u64,
    pub desc_base:   u64,
    pub desc_blocks: u32,
    pub omap_paddr:  u64,
    pub fs_oids:     Vec<u64>,
}

pub fn nx_superblock(l: &NxLayout) -> Vec<u8> {
    let mut b = object(1, l.xid, APFS_OBJ_TYPE_NX_SUPERBLOCK, 0);
    put_u32(&mut b, APFS_NX_MAGIC_OFFSET, APFS_NX_MAGIC);
    put_u32(&mut b, APFS_NX_BLOCK_SIZE_OFFSET, BS as u32);
    put_u64(&mut b, APFS_NX_BLOCK_COUNT_OFFSET, 64);
    put_u64(&mut b, APFS_NX_NEXT_XID_OFFSET, l.xid + 1);
    put_u32(&mut b, APFS_NX_XP_DESC_BLOCKS_OFFSET, l.desc_blocks);
    put_u64(&mut b, APFS_NX_XP_DESC_BASE_OFFSET, l.desc_base);
    put_u64(&mut b, APFS_NX_OMAP_OID_OFFSET, l.omap_paddr);
    put_u32(&mut b, APFS_NX_MAX_FILE_SYSTEMS_OFFSET, APFS_NX_MAX_FILE_SYSTEMS as u32);
    for (i, &oid) in l.fs_oids.iter().enumerate() {
        put_u64(&mut b, APFS_NX_FS_OID_OFFSET + i * 8, oid);
    }
    sealed(b)
}

pub fn checkpoint_map(xid: u64) -> Vec<u8> {
    sealed(object(0, xid, APFS_OBJ_TYPE_CHECKPOINT_MAP, 0))
}

pub fn omap_phys(paddr: u64, tree_paddr: u64) -> Vec<u8> {
    let mut b = object(paddr, 1, APFS_OBJ_TYPE_OMAP, 0);
    put_u64(&mut b, 48, tree_paddr);
    sealed(b)
}

/// Single root-leaf omap tree mapping `(oid, xid) → paddr`.
pub fn omap_leaf(paddr: u64, entries: &[(u64, u64, u64)]) -> Vec<u8> {
    let mut node = NodeBuilder::leaf(paddr).fixed().root();
    for &(oid, xid, target) in entries {
        let mut key = oid.to_le_bytes().to_vec();
        key.extend_from_slice(&xid.to_le_bytes());

        let mut val = 0u32.to_le_bytes().to_vec();
        val.extend_from_slice(&(BS as u32).to_le_bytes());
        val.extend_from_slice(&target.to_le_bytes());

        node = node.entry(&key, &val);
    }
    node.build()
}

pub fn volume_superblock(oid: u64, name: &str, omap_paddr: u64, root_tree_oid: u64) -> Vec<u8> {
    let mut b = object(oid, 1, APFS_OBJ_TYPE_FS, 0);
    put_u32(&mut b, APFS_APSB_MAGIC_OFFSET, APFS_APSB_MAGIC);
    put_u64(&mut b, APFS_APSB_OMAP_OID_OFFSET, omap_paddr);
    put_u64(&mut b, APFS_APSB_ROOT_TREE_OID_OFFSET, root_tree_oid);
    put_u32(&mut b, APFS_APSB_ROOT_TREE_TYPE_OFFSET, APFS_OBJ_TYPE_BTREE as u32);
    b[APFS_APSB_VOLNAME_OFFSET..APFS_APSB_VOLNAME_OFFSET + name.len()].copy_from_slice(name.as_bytes());
    sealed(b)
}

// ─── Filesystem records ─────────────────────────────────────────────────────

fn j_key(obj_id: u64, kind: u8) -> Vec<u8> {
    make_key_header(obj_id, kind).to_le_bytes().to_vec()
}

pub fn inode_record(id: u64, parent: u64, mode: u16, name: &str, size: Option<u64>) -> (Vec<u8>, Vec<u8>) {
    let val = raw::JInodeVal {
        parent_id:                parent.to_le(),
        private_id:               id.to_le(),
        create_time:              1_600_000_000_000_000_000u64.to_le(),
        mod_time:                 1_600_000_000_000_000_000u64.to_le(),
        change_time:              0,
        access_time:              0,
        internal_flags:           0,
        nchildren_or_nlink:       1u32.to_le(),
        default_protection_class: 0,
        write_generation_counter: 0,
        bsd_flags:                0,
        owner:                    501u32.to_le(),
        group:                    20u32.to_le(),
        mode:                     mode.to_le(),
        pad1:                     0,
        uncompressed_size:        0,
    };
    let mut value = bytemuck::bytes_of(&val).to_vec();

    let mut name_data = name.as_bytes().to_vec();
    name_data.push(0);

    let mut fields: Vec<(u8, Vec<u8>)> = vec![(APFS_INO_EXT_TYPE_NAME, name_data)];
    if let Some(size) = size {
        let ds = raw::JDstream {
            size:                size.to_le(),
            alloced_size:        size.next_multiple_of(BS as u64).to_le(),
            default_crypto_id:   0,
            total_bytes_written: size.to_le(),
            total_bytes_read:    0,
        };
        fields.push((APFS_INO_EXT_TYPE_DSTREAM, bytemuck::bytes_of(&ds).to_vec()));
    }

    let used: usize = fields.iter().map(|(_, d)| d.len().next_multiple_of(APFS_XF_ALIGN)).sum();
    value.extend_from_slice(&(fields.len() as u16).to_le_bytes());
    value.extend_from_slice(&(used as u16).to_le_bytes());
    for (x_type, data) in &fields {
        value.extend_from_slice(&[*x_type, 0]);
        value.extend_from_slice(&(data.len() as u16).to_le_bytes());
    }
    for (_, data) in &fields {
        let start = value.len();
        value.extend_from_slice(data);
        value.resize(start + data.len().next_multiple_of(APFS_XF_ALIGN), 0);
    }

    (j_key(id, APFS_TYPE_INODE), value)
}

pub fn drec_record(parent: u64, name: &str, file_id: u64, dt: u8) -> (Vec<u8>, Vec<u8>) {
    let mut key = j_key(parent, APFS_TYPE_DIR_REC);
    let name_len = name.len() as u32 + 1;
    let hash = 0x2A_5A5Au32;
    key.extend_from_slice(&((hash << 10) | name_len).to_le_bytes());
    key.extend_from_slice(name.as_bytes());
    key.push(0);

    let val = raw::JDrecVal {
        file_id:    file_id.to_le(),
        date_added: 0,
        flags:      (dt as u16).to_le(),
    };
    (key, bytemuck::bytes_of(&val).to_vec())
}

pub fn extent_record(id: u64, logical_addr: u64, len_and_flags: u64, phys_block: u64) -> (Vec<u8>, Vec<u8>) {
    let mut key = j_key(id, APFS_TYPE_FILE_EXTENT);
    key.extend_from_slice(&logical_addr.to_le_bytes());

    let val = raw::JFileExtentVal {
        len_and_flags:  len_and_flags.to_le(),
        phys_block_num: phys_block.to_le(),
        crypto_id:      0,
    };
    (key, bytemuck::bytes_of(&val).to_vec())
}

pub fn xattr_record(id: u64, name: &str) -> (Vec<u8>, Vec<u8>) {
    let mut key = j_key(id, APFS_TYPE_XATTR);
    key.extend_from_slice(&(name.len() as u16 + 1).to_le_bytes());
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    (key, vec![0u8; 4])
}

/// One volume "TestVol" holding `A/B`, B being 4096 bytes at block 40.
///
/// The fs tree has an internal root (virtual 1028) over two leaves (1029,
/// 1030), so every child hop goes through the volume omap.
pub fn sample_container() -> Image {
    let mut img = Image::new();

    let layout = NxLayout { xid: 2, desc_base: 1, desc_blocks: 2, omap_paddr: 10, fs_oids: vec![1026] };
    img.put(0, nx_superblock(&layout));
    img.put(1, checkpoint_map(2));
    img.put(2, nx_superblock(&layout));

    img.put(10, omap_phys(10, 11));
    img.put(11, omap_leaf(11, &[(1026, 2, 20)]));

    img.put(20, volume_superblock(1026, "TestVol", 21, 1028));
    img.put(21, omap_phys(21, 22));
    img.put(22, omap_leaf(22, &[(1028, 2, 30), (1029, 2, 31), (1030, 2, 32)]));

    img.put(30, NodeBuilder::internal(1028)
        .root()
        .entry(&j_key(2, APFS_TYPE_INODE), &1029u64.to_le_bytes())
        .entry(&j_key(17, APFS_TYPE_INODE), &1030u64.to_le_bytes())
        .build());

    let mut left = NodeBuilder::leaf(1029);
    for (k, v) in [
        inode_record(2, 1, S_IFDIR | 0o755, "root", None),
        drec_record(2, "A", 16, DT_DIR),
        inode_record(16, 2, S_IFDIR | 0o755, "A", None),
        drec_record(16, "B", 17, DT_REG),
    ] {
        left = left.entry(&k, &v);
    }
    img.put(31, left.build());

    let mut right = NodeBuilder::leaf(1030);
    for (k, v) in [
        inode_record(17, 16, S_IFREG | 0o644, "B", Some(4096)),
        extent_record(17, 0, 0x1000, 40),
    ] {
        right = right.entry(&k, &v);
    }
    img.put(32, right.build());

    img.put(40, (0..BS).map(|i| (i * 7 % 256) as u8).collect());

    debug_assert_eq!(mem::size_of::<raw::JInodeVal>(), 92);
    debug_assert_eq!(mem::size_of::<raw::JDrecVal>(), 18);
    img
}

// ─── Recording materializer ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Enter(String),
    Leave,
    File(String, u64),
    Extent(String, u64, u64),
}

#[derive(Default)]
pub struct Recorder {
    pub events:    Vec<Event>,
    pub depth:     usize,
    pub max_depth: usize,
}

impl Materializer for Recorder {
    fn enter_directory(&mut self, name: &str) -> Result<()> {
        self.events.push(Event::Enter(name.to_owned()));
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        Ok(())
    }

    fn leave_directory(&mut self) -> Result<()> {
        assert!(self.depth > 0, "leave_directory with an empty stack");
        self.events.push(Event::Leave);
        self.depth -= 1;
        Ok(())
    }

    fn report_file(&mut self, name: &str, size: u64) -> Result<()> {
        self.events.push(Event::File(name.to_owned(), size));
        Ok(())
    }

    fn append_extent<S: ByteSource>(
        &mut self,
        _reader:    &BlockReader<S>,
        file_name:  &str,
        phys_block: u64,
        len:        u64,
    ) -> Result<()> {
        self.events.push(Event::Extent(file_name.to_owned(), phys_block, len));
        Ok(())
    }
}

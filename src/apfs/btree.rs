//! Generic on-disk B-tree engine shared by object maps and fs-record trees.
//!
//! Node layout (btree_node_phys_t):
//!
//! ```text
//!   0    obj_phys_t (32)
//!   32   flags / level / nkeys / table_space / free_space / free lists (24)
//!   56   table of contents   (table_space.len bytes, kvoff_t or kvloc_t)
//!   ..   keys                (offsets relative to the end of the ToC)
//!   ..   free space
//!   ..   values              (offsets counted back from value_end)
//!   end  btree_info_t        (40 bytes, root nodes only)
//! ```

use crate::error::{Error, Result};
use crate::source::{pod_at, BlockReader, ByteSource};
use crate::tracy;

use super::{
    raw, ObjHeader,
    APFS_BTNODE_TOC_START, APFS_BTNODE_ROOT, APFS_BTNODE_LEAF, APFS_BTNODE_FIXED_KV_SIZE,
    APFS_BTREE_INFO_SIZE, APFS_BTREE_CHILD_OID_SIZE,
    APFS_OBJ_TYPE_BTREE, APFS_OBJ_TYPE_BTREE_NODE,
};

use std::cmp::Ordering;
use std::mem;

/// Upper bound on tree height; real APFS trees are a handful of levels deep.
pub const MAX_TREE_DEPTH: usize = 16;

pub type KeyCmp = fn(&[u8], &[u8]) -> Ordering;

/// Length is the primary term (a longer key is greater), then bytes in order.
#[inline]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Like [`compare_keys`] but orders the leading 8 bytes as a little-endian
/// object id, so omap keys sort the way the tree was built.
#[inline]
pub fn compare_oid_keys(a: &[u8], b: &[u8]) -> Ordering {
    #[inline(always)]
    fn oid(k: &[u8]) -> Option<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(k.get(..8)?);
        Some(u64::from_le_bytes(b))
    }

    a.len().cmp(&b.len()).then_with(|| match (oid(a), oid(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a[8..].cmp(&b[8..])),
        _ => a.cmp(b),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Leaf hit: the value bytes
    Found(Vec<u8>),
    /// Internal node: the child identifier to follow (not yet translated)
    Descend(u64),
    NotFound,
}

/// Key/value sizes for trees whose nodes carry `kvoff_t` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSizes {
    pub key_len: usize,
    /// Value size in leaf nodes; internal nodes always hold 8-byte child ids.
    pub val_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub key:   &'a [u8],
    pub value: &'a [u8],
}

pub struct Node {
    pub header: ObjHeader,
    pub flags:  u16,
    pub level:  u16,
    pub nkeys:  u32,
    toc_start:  usize,
    key_start:  usize,
    val_end:    usize,
    block:      Vec<u8>,
}

impl Node {
    pub fn parse(block: Vec<u8>) -> Result<Self> {
        let _span = tracy::span!("Node::parse");

        let hdr: raw::BtreeNodePhys = pod_at(&block, 0)?;
        let header = ObjHeader::from_raw(&hdr.btn_o);

        if !matches!(header.block_type(), APFS_OBJ_TYPE_BTREE | APFS_OBJ_TYPE_BTREE_NODE) {
            return Err(Error::corrupt(format!(
                "object {} is type {:#x}, not a B-tree node", header.oid, header.block_type()
            )));
        }

        let flags = u16::from_le(hdr.btn_flags);
        let nkeys = u32::from_le(hdr.btn_nkeys);
        let toc_start = APFS_BTNODE_TOC_START + u16::from_le(hdr.btn_table_space_off) as usize;
        let toc_len = u16::from_le(hdr.btn_table_space_len) as usize;
        let key_start = toc_start + toc_len;

        let val_end = if flags & APFS_BTNODE_ROOT != 0 {
            block.len().checked_sub(APFS_BTREE_INFO_SIZE)
                .ok_or_else(|| Error::corrupt("root node smaller than its btree_info trailer"))?
        } else {
            block.len()
        };

        if key_start > val_end {
            return Err(Error::corrupt(format!(
                "node {}: table of contents ends at {key_start:#x}, past the value area", header.oid
            )));
        }

        let entry_size = if flags & APFS_BTNODE_FIXED_KV_SIZE != 0 {
            mem::size_of::<raw::KvOff>()
        } else {
            mem::size_of::<raw::KvLoc>()
        };
        if nkeys as usize * entry_size > toc_len {
            return Err(Error::corrupt(format!(
                "node {}: {nkeys} entries do not fit a {toc_len} byte table", header.oid
            )));
        }

        Ok(Self {
            header,
            flags,
            level: u16::from_le(hdr.btn_level),
            nkeys,
            toc_start,
            key_start,
            val_end,
            block,
        })
    }

    #[inline(always)] pub const fn is_root(&self)  -> bool { self.flags & APFS_BTNODE_ROOT != 0 }
    #[inline(always)] pub const fn is_leaf(&self)  -> bool { self.flags & APFS_BTNODE_LEAF != 0 }
    #[inline(always)] pub const fn is_fixed(&self) -> bool { self.flags & APFS_BTNODE_FIXED_KV_SIZE != 0 }

    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.nkeys as usize
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.nkeys == 0
    }

    /// Decode ToC entry `index`.  `fixed` supplies the sizes `kvoff_t`
    /// entries leave implicit; it is ignored for variable-size nodes.
    pub fn entry(&self, index: usize, fixed: Option<FixedSizes>) -> Result<Entry<'_>> {
        debug_assert!(index < self.len());

        let (k_off, k_len, v_off, v_len) = if self.is_fixed() {
            let Some(sizes) = fixed else {
                return Err(Error::corrupt(format!(
                    "node {} has fixed-size entries but no key/value sizes were given", self.header.oid
                )));
            };
            let kv: raw::KvOff = pod_at(&self.block, self.toc_start + index * mem::size_of::<raw::KvOff>())?;
            let v_len = if self.is_leaf() { sizes.val_len } else { APFS_BTREE_CHILD_OID_SIZE };
            (u16::from_le(kv.k) as usize, sizes.key_len, u16::from_le(kv.v) as usize, v_len)
        } else {
            let kv: raw::KvLoc = pod_at(&self.block, self.toc_start + index * mem::size_of::<raw::KvLoc>())?;
            (
                u16::from_le(kv.k_off) as usize, u16::from_le(kv.k_len) as usize,
                u16::from_le(kv.v_off) as usize, u16::from_le(kv.v_len) as usize,
            )
        };

        let key_at = self.key_start + k_off;
        let key = self.block.get(key_at..key_at + k_len)
            .filter(|_| key_at + k_len <= self.val_end)
            .ok_or_else(|| Error::corrupt(format!(
                "node {} entry {index}: key {k_off:#x}+{k_len} out of bounds", self.header.oid
            )))?;

        let value = self.val_end.checked_sub(v_off)
            .filter(|&at| at >= self.key_start && at + v_len <= self.val_end)
            .and_then(|at| self.block.get(at..at + v_len))
            .ok_or_else(|| Error::corrupt(format!(
                "node {} entry {index}: value {v_off:#x}+{v_len} out of bounds", self.header.oid
            )))?;

        Ok(Entry { key, value })
    }

    /// Decode the 8-byte child identifier stored as an internal entry value.
    #[inline]
    pub fn child_id(&self, entry: &Entry<'_>) -> Result<u64> {
        let v = entry.value;
        if v.len() != APFS_BTREE_CHILD_OID_SIZE {
            return Err(Error::ValueSizeMismatch { expected: APFS_BTREE_CHILD_OID_SIZE, actual: v.len() });
        }
        Ok(u64::from_le_bytes([v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7]]))
    }
}

/// Point search in the single node at byte address `node_addr`.
///
/// Entries are scanned from the highest index down so the newest of any
/// duplicate keys wins.  On an internal node the first entry whose key is
/// `<= search_key` names the child to descend into; on a leaf only an exact
/// match with a `value_len` sized value is accepted.
pub fn search<S: ByteSource>(
    reader:     &BlockReader<S>,
    node_addr:  u64,
    search_key: &[u8],
    value_len:  usize,
    cmp:        KeyCmp,
) -> Result<Lookup> {
    let _span = tracy::span!("btree::search");

    let node = Node::parse(reader.read_object(node_addr)?)?;
    search_node(&node, search_key, value_len, cmp)
}

pub fn search_node(node: &Node, search_key: &[u8], value_len: usize, cmp: KeyCmp) -> Result<Lookup> {
    let fixed = Some(FixedSizes { key_len: search_key.len(), val_len: value_len });

    for index in (0..node.len()).rev() {
        let entry = node.entry(index, fixed)?;
        let ord = cmp(search_key, entry.key);

        if !node.is_leaf() {
            if ord != Ordering::Less {
                return node.child_id(&entry).map(Lookup::Descend);
            }
        } else if ord == Ordering::Equal {
            if entry.value.len() != value_len {
                return Err(Error::ValueSizeMismatch { expected: value_len, actual: entry.value.len() });
            }
            return Ok(Lookup::Found(entry.value.to_vec()));
        }
    }

    Ok(Lookup::NotFound)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TraverseStats {
    pub nodes:   usize,
    pub records: usize,
    /// Subtrees abandoned because a child could not be resolved or read
    pub skipped: usize,
}

/// Visit every leaf record under `root_addr` in ascending ToC order.
///
/// `resolve_child` turns an internal entry's child id into the byte address
/// of the child node.  Non-fatal failures below the root (an unresolvable
/// child, a corrupt node, a record `visit` rejects) are logged and that
/// subtree or record is skipped; fatal ones abort the traversal.
pub fn traverse<S, R, V>(
    reader:        &BlockReader<S>,
    root_addr:     u64,
    fixed:         Option<FixedSizes>,
    mut resolve_child: R,
    mut visit:     V,
) -> Result<TraverseStats>
where
    S: ByteSource,
    R: FnMut(u64) -> Result<u64>,
    V: FnMut(Entry<'_>) -> Result<()>,
{
    let _span = tracy::span!("btree::traverse");

    let mut stats = TraverseStats::default();
    let root = Node::parse(reader.read_object(root_addr)?)?;
    traverse_node(reader, &root, fixed, 0, &mut resolve_child, &mut visit, &mut stats)?;
    Ok(stats)
}

fn traverse_node<S, R, V>(
    reader:        &BlockReader<S>,
    node:          &Node,
    fixed:         Option<FixedSizes>,
    depth:         usize,
    resolve_child: &mut R,
    visit:         &mut V,
    stats:         &mut TraverseStats,
) -> Result<()>
where
    S: ByteSource,
    R: FnMut(u64) -> Result<u64>,
    V: FnMut(Entry<'_>) -> Result<()>,
{
    if depth >= MAX_TREE_DEPTH {
        return Err(Error::TreeTooDeep { max_depth: MAX_TREE_DEPTH });
    }
    stats.nodes += 1;

    for index in 0..node.len() {
        let entry = match node.entry(index, fixed) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("node {}: skipping entry {index}: {e}", node.header.oid);
                continue;
            }
        };

        if node.is_leaf() {
            stats.records += 1;
            if let Err(e) = visit(entry) {
                if e.is_fatal() { return Err(e) }
                log::warn!("node {}: record {index} skipped: {e}", node.header.oid);
            }
            continue;
        }

        let subtree = node.child_id(&entry)
            .and_then(|child| {
                let addr = resolve_child(child)?;
                log::trace!("node {}: descending into child {child} at {addr:#x}", node.header.oid);
                Node::parse(reader.read_object(addr)?)
            })
            .and_then(|child| traverse_node(reader, &child, fixed, depth + 1, resolve_child, visit, stats));

        if let Err(e) = subtree {
            if e.is_fatal() { return Err(e) }
            stats.skipped += 1;
            log::warn!("node {}: subtree {index} skipped: {e}", node.header.oid);
        }
    }

    Ok(())
}

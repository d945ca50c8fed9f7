//! Object map: virtual object id → physical block translation.

use crate::error::{Error, Result};
use crate::source::{pod_at, BlockReader, ByteSource};
use crate::tracy;

use super::btree::{self, Lookup, MAX_TREE_DEPTH};
use super::{
    raw, ObjHeader, ObjId, ObjectMap,
    APFS_OBJ_TYPE_OMAP, APFS_OMAP_VAL_SIZE,
};

/// Read the omap_phys_t stored at physical block `paddr`.
pub fn load<S: ByteSource>(reader: &BlockReader<S>, paddr: u64) -> Result<ObjectMap> {
    let _span = tracy::span!("omap::load");

    let block = reader.read_object(reader.block_offset(paddr)?)?;
    let phys: raw::OmapPhys = pod_at(&block, 0)?;
    let header = ObjHeader::from_raw(&phys.om_o);

    if header.block_type() != APFS_OBJ_TYPE_OMAP {
        return Err(Error::corrupt(format!(
            "block {paddr} is type {:#x}, not an object map", header.block_type()
        )));
    }

    Ok(ObjectMap {
        header,
        flags:     u32::from_le(phys.om_flags),
        tree_type: u32::from_le(phys.om_tree_type),
        tree_oid:  u64::from_le(phys.om_tree_oid),
    })
}

/// Resolve `oid` through the omap tree whose root node sits at byte address
/// `root_addr`, returning the physical block number it maps to.
///
/// Only the oid half of the (oid, xid) key is constrained; the newest entry
/// for the oid wins.
pub fn resolve<S: ByteSource>(reader: &BlockReader<S>, root_addr: u64, oid: ObjId) -> Result<u64> {
    let _span = tracy::span!("omap::resolve");

    let search_key = oid.to_le_bytes();
    let mut node_addr = root_addr;

    for _ in 0..MAX_TREE_DEPTH {
        match btree::search(reader, node_addr, &search_key, APFS_OMAP_VAL_SIZE, btree::compare_oid_keys)? {
            Lookup::Found(value) => {
                let val: raw::OmapVal = pod_at(&value, 0)?;
                let paddr = u64::from_le(val.ov_paddr);
                log::trace!("omap: oid {oid} -> block {paddr}");
                return Ok(paddr);
            }
            Lookup::Descend(child) => node_addr = reader.block_offset(child)?,
            Lookup::NotFound => return Err(Error::ObjectNotFound { oid }),
        }
    }

    Err(Error::TreeTooDeep { max_depth: MAX_TREE_DEPTH })
}

impl ObjectMap {
    #[inline]
    pub fn resolve<S: ByteSource>(&self, reader: &BlockReader<S>, oid: ObjId) -> Result<u64> {
        resolve(reader, reader.block_offset(self.tree_oid)?, oid)
    }

    /// Resolve `oid` straight to a byte address.
    #[inline]
    pub fn resolve_addr<S: ByteSource>(&self, reader: &BlockReader<S>, oid: ObjId) -> Result<u64> {
        reader.block_offset(self.resolve(reader, oid)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{omap_leaf, omap_phys, Image, NodeBuilder, BS};

    #[test]
    fn test_round_trip_single_leaf() {
        let mut img = Image::new();
        img.put(5, omap_phys(5, 6));
        img.put(6, omap_leaf(6, &[(1026, 1, 300), (1028, 1, 301), (1030, 2, 0x1_0000)]));
        let reader = img.reader();

        let omap = load(&reader, 5).unwrap();
        assert_eq!(omap.tree_oid, 6);
        assert_eq!(omap.resolve(&reader, 1026).unwrap(), 300);
        assert_eq!(omap.resolve(&reader, 1030).unwrap(), 0x1_0000);
        assert_eq!(omap.resolve_addr(&reader, 1028).unwrap(), 301 * BS as u64);

        let err = omap.resolve(&reader, 1027).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { oid: 1027 }));
    }

    #[test]
    fn test_newest_xid_wins_for_duplicate_oids() {
        let mut img = Image::new();
        img.put(6, omap_leaf(6, &[(1026, 1, 300), (1026, 9, 900)]));
        let reader = img.reader();

        assert_eq!(resolve(&reader, 6 * BS as u64, 1026).unwrap(), 900);
    }

    #[test]
    fn test_descends_through_internal_nodes() {
        // internal root → two leaves; child ids are physical block numbers
        let mut k0 = 0u64.to_le_bytes().to_vec();
        k0.extend_from_slice(&0u64.to_le_bytes());
        let mut k1 = 0x500u64.to_le_bytes().to_vec();
        k1.extend_from_slice(&0u64.to_le_bytes());

        let root = NodeBuilder::internal(7)
            .fixed()
            .root()
            .entry(&k0, &8u64.to_le_bytes())
            .entry(&k1, &9u64.to_le_bytes())
            .build();

        let mut img = Image::new();
        img.put(7, root);
        img.put(8, omap_leaf(8, &[(0x100, 1, 10), (0x4FF, 1, 11)]).to_vec());
        img.put(9, omap_leaf(9, &[(0x500, 1, 12), (0x9000, 1, 13)]).to_vec());
        let reader = img.reader();

        let root_addr = 7 * BS as u64;
        assert_eq!(resolve(&reader, root_addr, 0x100).unwrap(), 10);
        assert_eq!(resolve(&reader, root_addr, 0x4FF).unwrap(), 11);
        assert_eq!(resolve(&reader, root_addr, 0x500).unwrap(), 12);
        assert_eq!(resolve(&reader, root_addr, 0x9000).unwrap(), 13);
        assert!(matches!(resolve(&reader, root_addr, 0x501), Err(Error::ObjectNotFound { .. })));
    }

    #[test]
    fn test_out_of_range_paddr_is_corruption() {
        let mut img = Image::new();
        img.put(5, omap_phys(5, 6));
        img.put(6, omap_leaf(6, &[(1026, 1, u64::MAX / 16)]));
        let reader = img.reader();

        let omap = load(&reader, 5).unwrap();
        assert_eq!(omap.resolve(&reader, 1026).unwrap(), u64::MAX / 16);
        let err = omap.resolve_addr(&reader, 1026).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        assert!(!err.is_fatal());

        let bad_tree = ObjectMap { tree_oid: u64::MAX, ..omap };
        assert!(matches!(bad_tree.resolve(&reader, 1026), Err(Error::Corrupt(_))));
        assert!(matches!(load(&reader, u64::MAX), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_load_rejects_wrong_type() {
        let mut img = Image::new();
        img.put(6, omap_leaf(6, &[(1, 1, 1)]));
        let reader = img.reader();

        assert!(matches!(load(&reader, 6), Err(Error::Corrupt(_))));
    }
}

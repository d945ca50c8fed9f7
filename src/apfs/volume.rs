//! Volume superblock lookup through the container object map.

use crate::error::{Error, Result};
use crate::source::{BlockReader, ByteSource};
use crate::tracy;

use super::parser::parse_volume_superblock;
use super::{omap, ContainerSuperblock, ObjId, ObjectMap, VolumeSuperblock};

#[derive(Debug, Clone)]
pub struct Volume {
    /// Virtual oid the volume was looked up by
    pub oid:        ObjId,
    /// Physical block of the volume superblock
    pub paddr:      u64,
    pub superblock: VolumeSuperblock,
}

impl Volume {
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.superblock.name
    }

    /// The volume's own object map (apfs_omap_oid is a physical address).
    #[inline]
    pub fn omap<S: ByteSource>(&self, reader: &BlockReader<S>) -> Result<ObjectMap> {
        omap::load(reader, self.superblock.omap_oid)
    }

    /// Byte address of the fs-record tree root, resolved through `omap`.
    pub fn fs_root_addr<S: ByteSource>(&self, reader: &BlockReader<S>, omap: &ObjectMap) -> Result<u64> {
        omap.resolve_addr(reader, self.superblock.root_tree_oid)
    }
}

pub struct VolumeResolver<'r, S> {
    reader: &'r BlockReader<S>,
    omap:   ObjectMap,
    oids:   Vec<ObjId>,
}

impl<'r, S: ByteSource> VolumeResolver<'r, S> {
    pub fn new(reader: &'r BlockReader<S>, nx: &ContainerSuperblock) -> Result<Self> {
        let omap = omap::load(reader, nx.omap_oid)?;
        Ok(Self { reader, omap, oids: nx.volume_oids().collect() })
    }

    #[inline(always)]
    pub fn volume_oids(&self) -> &[ObjId] {
        &self.oids
    }

    /// Resolve one volume by its virtual oid.
    pub fn find(&self, oid: ObjId) -> Result<Volume> {
        let _span = tracy::span!("VolumeResolver::find");

        let paddr = self.omap.resolve(self.reader, oid).map_err(|e| match e {
            Error::ObjectNotFound { .. } => Error::VolumeNotFound { oid },
            e => e,
        })?;

        let block = self.reader.read_object(self.reader.block_offset(paddr)?)?;
        let superblock = parse_volume_superblock(&block)?;

        if superblock.header.oid != oid {
            return Err(Error::corrupt(format!(
                "volume superblock at block {paddr} claims oid {}, expected {oid}",
                superblock.header.oid
            )));
        }

        Ok(Volume { oid, paddr, superblock })
    }

    /// Every volume listed in the superblock, in array order.  Each lookup
    /// succeeds or fails on its own.
    pub fn all(&self) -> impl Iterator<Item = (ObjId, Result<Volume>)> + '_ {
        self.oids.iter().map(move |&oid| (oid, self.find(oid)))
    }
}

//! Checkpoint descriptor scan: find the newest container superblock.

use crate::error::{Error, Result};
use crate::source::{BlockReader, ByteSource};
use crate::tracy;

use super::checksum;
use super::parser::parse_container_superblock;
use super::{ContainerSuperblock, ObjHeader};

use std::fmt::{self, Display};

#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Physical block of the winning superblock
    pub paddr:      u64,
    pub superblock: ContainerSuperblock,
    /// Every other superblock found in the descriptor area, newest first
    pub older:      Vec<OlderCheckpoint>,
}

#[derive(Debug, Clone, Copy)]
pub struct OlderCheckpoint {
    pub paddr:  u64,
    pub header: ObjHeader,
}

/// Scan the checkpoint descriptor area from its last block to its first and
/// return the superblock with the highest transaction id.
///
/// Non-superblock entries (checkpoint maps) are passed over.  When checksum
/// verification is on, candidates that fail it are ignored.
pub fn find_latest<S: ByteSource>(reader: &BlockReader<S>) -> Result<Checkpoint> {
    let _span = tracy::span!("checkpoint::find_latest");

    let first = parse_container_superblock(&reader.read_block(0)?)?;
    if !first.desc_is_contiguous() {
        return Err(Error::Unsupported("non-contiguous checkpoint descriptor area".into()));
    }

    let base = first.xp_desc_base;
    let count = first.desc_block_count() as u64;
    log::debug!("checkpoint descriptor area: {count} blocks at {base}");

    let mut best: Option<(u64, ContainerSuperblock)> = None;
    let mut older = Vec::new();

    for i in (0..count).rev() {
        let paddr = base.checked_add(i).ok_or_else(|| {
            Error::corrupt(format!("checkpoint descriptor area at {base} overflows"))
        })?;
        let header = reader.read_header(reader.block_offset(paddr)?)?;

        if !header.is_superblock() {
            log::trace!("descriptor block {paddr}: type {:#x}, not a superblock", header.block_type());
            continue;
        }

        let block = reader.read_block(paddr)?;
        if reader.verifies_checksums() && !checksum::is_valid(&block) {
            log::warn!("descriptor block {paddr}: superblock checksum mismatch, ignored");
            continue;
        }

        let sb = match parse_container_superblock(&block) {
            Ok(sb) => sb,
            Err(e) => {
                log::warn!("descriptor block {paddr}: {e}");
                continue;
            }
        };

        match &best {
            Some((_, cur)) if cur.header.xid >= sb.header.xid => {
                older.push(OlderCheckpoint { paddr, header: sb.header });
            }
            _ => {
                if let Some((prev_paddr, prev)) = best.replace((paddr, sb)) {
                    older.push(OlderCheckpoint { paddr: prev_paddr, header: prev.header });
                }
            }
        }
    }

    let Some((paddr, superblock)) = best else {
        return Err(Error::NoValidCheckpoint);
    };

    older.sort_by(|a, b| b.header.xid.cmp(&a.header.xid));
    log::info!(
        "latest checkpoint: xid {} at block {paddr} ({} older)",
        superblock.header.xid, older.len()
    );

    Ok(Checkpoint { paddr, superblock, older })
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Latest superblock at block {}", self.paddr)?;
        write!(f, "{}", self.superblock)?;
        for old in &self.older {
            writeln!(f)?;
            writeln!(f, "Older checkpoint superblock at block {}", old.paddr)?;
            write!(f, "{}", old.header)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReaderOptions;
    use crate::testkit::{checkpoint_map, nx_superblock, Image, NxLayout};

    fn layout(xid: u64) -> NxLayout {
        NxLayout { xid, desc_base: 1, desc_blocks: 6, omap_paddr: 10, fs_oids: vec![1026] }
    }

    #[test]
    fn test_picks_max_xid_regardless_of_order() {
        let orders: [&[u64]; 3] = [&[3, 9, 5], &[9, 5, 3], &[5, 3, 9]];

        for xids in orders {
            let mut img = Image::new();
            img.put(0, nx_superblock(&layout(1)));
            for (i, &xid) in xids.iter().enumerate() {
                img.put(1 + 2 * i as u64, checkpoint_map(xid));
                img.put(2 + 2 * i as u64, nx_superblock(&layout(xid)));
            }

            let cp = find_latest(&img.reader()).unwrap();
            assert_eq!(cp.superblock.header.xid, 9, "order {xids:?}");

            let expected_paddr = 2 + 2 * xids.iter().position(|&x| x == 9).unwrap() as u64;
            assert_eq!(cp.paddr, expected_paddr);

            let older: Vec<_> = cp.older.iter().map(|o| o.header.xid).collect();
            assert_eq!(older, vec![5, 3]);
        }
    }

    #[test]
    fn test_no_superblock_is_fatal() {
        let mut img = Image::new();
        img.put(0, nx_superblock(&layout(1)));
        for b in 1..=6 {
            img.put(b, checkpoint_map(b));
        }

        let err = find_latest(&img.reader()).unwrap_err();
        assert!(matches!(err, Error::NoValidCheckpoint));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_descriptor_area_past_address_space_is_corruption() {
        let mut img = Image::new();
        img.put(0, nx_superblock(&NxLayout { desc_base: u64::MAX - 2, ..layout(1) }));

        assert!(matches!(find_latest(&img.reader()), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_checksum_mismatch_skips_candidate_when_verifying() {
        let mut img = Image::new();
        img.put(0, nx_superblock(&layout(1)));
        img.put(1, nx_superblock(&layout(4)));
        img.put(2, nx_superblock(&layout(8)));
        for b in 3..=6 {
            img.put(b, checkpoint_map(b));
        }
        img.corrupt_byte(2, 1000);

        let cp = find_latest(&img.reader()).unwrap();
        assert_eq!(cp.superblock.header.xid, 8);

        let cp = find_latest(&img.reader_with(ReaderOptions { verify_checksums: true })).unwrap();
        assert_eq!(cp.superblock.header.xid, 4);
    }

    #[test]
    fn test_report_lists_older_checkpoints() {
        let mut img = Image::new();
        img.put(0, nx_superblock(&layout(1)));
        img.put(1, nx_superblock(&layout(2)));
        img.put(2, nx_superblock(&layout(3)));
        for b in 3..=6 {
            img.put(b, checkpoint_map(b));
        }

        let report = find_latest(&img.reader()).unwrap().to_string();
        assert!(report.starts_with("Latest superblock at block 2"));
        assert!(report.contains("Older checkpoint superblock at block 1"));
        assert!(report.contains("Magic Number:          NXSB"));
    }
}

//! Depth-first replay of a volume's fs tree into a [`Materializer`].
//!
//! Records arrive sorted by object id, not in pre-order: a directory's
//! entries, its children's inodes and their extents interleave with
//! unrelated siblings.  [`TraversalState`] therefore remembers every
//! directory it has seen named (id → parent, name) and, whenever a record
//! belongs to a different directory than the current one, leaves and enters
//! directories along the two paths' common prefix.

use crate::error::{Error, Result};
use crate::materialize::Materializer;
use crate::source::{BlockReader, ByteSource};
use crate::tracy;

use super::btree::{self, TraverseStats};
use super::fs::{decode_record, DirEntry, FileExtent, FsRecord, Inode};
use super::volume::Volume;
use super::{APFS_PRIV_DIR_INO_NUM, APFS_ROOT_DIR_INO_NUM, APFS_ROOT_DIR_PARENT};

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

#[derive(Debug, Clone)]
struct KnownDir {
    parent: u64,
    name:   String,
}

#[derive(Debug, Clone)]
struct FileTarget {
    id:   u64,
    name: String,
    size: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub tree:        TraverseStats,
    pub directories: u64,
    pub files:       u64,
    pub bytes:       u64,
    /// Records dropped because their parent was private or never named
    pub orphans:     u64,
}

pub struct TraversalState {
    /// Directories currently entered, outermost first
    ancestors:  SmallVec<[u64; 16]>,
    known_dirs: HashMap<u64, KnownDir>,
    /// Ids whose records are ignored (private directory and below)
    skipped:    HashSet<u64>,
    /// Names seen in directory entries, used when an inode lacks its own
    file_names: HashMap<u64, String>,
    current:    Option<FileTarget>,
    summary:    WalkSummary,
}

impl TraversalState {
    /// The root directory (id 2) is materialized under `root_name`.
    pub fn new(root_name: &str) -> Self {
        let mut known_dirs = HashMap::new();
        known_dirs.insert(APFS_ROOT_DIR_INO_NUM, KnownDir {
            parent: APFS_ROOT_DIR_PARENT,
            name:   root_name.to_owned(),
        });

        let mut skipped = HashSet::new();
        skipped.insert(APFS_PRIV_DIR_INO_NUM);

        Self {
            ancestors: SmallVec::new(),
            known_dirs,
            skipped,
            file_names: HashMap::new(),
            current: None,
            summary: WalkSummary::default(),
        }
    }

    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    #[inline(always)]
    pub fn summary(&self) -> WalkSummary {
        self.summary
    }

    pub fn apply<S: ByteSource, M: Materializer>(
        &mut self,
        record: FsRecord,
        reader: &BlockReader<S>,
        m:      &mut M,
    ) -> Result<()> {
        match record {
            FsRecord::Inode(inode)     => self.on_inode(inode, m),
            FsRecord::DirEntry(drec)   => self.on_dir_entry(drec),
            FsRecord::FileExtent(ext)  => self.on_extent(ext, reader, m),
            FsRecord::Xattr { obj_id, name } => {
                log::trace!("{obj_id}: xattr {name:?}");
                Ok(())
            }
            FsRecord::Other { obj_id, kind } => {
                log::trace!("{obj_id}: record type {kind} not materialized");
                Ok(())
            }
        }
    }

    /// Leave every entered directory.
    pub fn finish<M: Materializer>(&mut self, m: &mut M) -> Result<()> {
        while self.ancestors.pop().is_some() {
            m.leave_directory()?;
        }
        self.current = None;
        Ok(())
    }

    fn on_inode<M: Materializer>(&mut self, inode: Inode, m: &mut M) -> Result<()> {
        self.current = None;

        if self.skipped.contains(&inode.obj_id) || self.skipped.contains(&inode.parent_id) {
            self.skipped.insert(inode.obj_id);
            return Ok(());
        }

        if inode.is_dir() {
            if self.known_dirs.contains_key(&inode.obj_id) {
                return self.navigate_to(inode.obj_id, m);
            }
            // A directory moved under a newer one is named only after its
            // own inode; a later entry still makes its children reachable.
            log::warn!("directory inode {} has no known entry in parent {} yet", inode.obj_id, inode.parent_id);
            self.summary.orphans += 1;
            return Ok(());
        }

        if !self.known_dirs.contains_key(&inode.parent_id) {
            log::warn!("inode {} lives in unknown directory {}, skipped", inode.obj_id, inode.parent_id);
            self.summary.orphans += 1;
            return Ok(());
        }

        let name = match inode.name.clone().or_else(|| self.file_names.remove(&inode.obj_id)) {
            Some(name) => name,
            None => {
                log::warn!("inode {} has no name, skipped", inode.obj_id);
                self.summary.orphans += 1;
                return Ok(());
            }
        };

        self.navigate_to(inode.parent_id, m)?;
        m.report_file(&name, inode.size())?;
        self.summary.files += 1;

        // Extents are keyed by the data stream id, which is the private id.
        let id = if inode.private_id != 0 { inode.private_id } else { inode.obj_id };
        self.current = Some(FileTarget { id, name, size: inode.size() });
        Ok(())
    }

    fn on_dir_entry(&mut self, drec: DirEntry) -> Result<()> {
        if self.skipped.contains(&drec.parent_id) || drec.file_id == APFS_PRIV_DIR_INO_NUM {
            if drec.is_dir() {
                self.skipped.insert(drec.file_id);
            }
            return Ok(());
        }

        if drec.is_dir() {
            if drec.file_id <= drec.parent_id {
                log::debug!("directory {} sorts before its parent {}", drec.file_id, drec.parent_id);
            }
            self.known_dirs.insert(drec.file_id, KnownDir { parent: drec.parent_id, name: drec.name });
        } else {
            log::debug!("{}: file {:?} (id {})", drec.parent_id, drec.name, drec.file_id);
            self.file_names.insert(drec.file_id, drec.name);
        }
        Ok(())
    }

    fn on_extent<S: ByteSource, M: Materializer>(
        &mut self,
        ext:    FileExtent,
        reader: &BlockReader<S>,
        m:      &mut M,
    ) -> Result<()> {
        let Some(target) = self.current.as_ref().filter(|t| t.id == ext.obj_id) else {
            log::debug!("extent for {} at {:#x} has no current file, skipped", ext.obj_id, ext.logical_addr);
            return Ok(());
        };

        // Clamp to the logical size; the last block is usually partly used.
        let len = ext.length.min(target.size.saturating_sub(ext.logical_addr));
        if len == 0 {
            return Ok(());
        }
        if ext.phys_block == 0 {
            log::debug!("{}: sparse extent at {:#x} not materialized", target.name, ext.logical_addr);
            return Ok(());
        }

        m.append_extent(reader, &target.name, ext.phys_block, len)?;
        self.summary.bytes += len;
        Ok(())
    }

    /// Root-first chain of directory ids ending in `dir`.
    fn chain_to(&self, dir: u64) -> Result<SmallVec<[u64; 16]>> {
        let mut chain = SmallVec::<[u64; 16]>::new();
        let mut id = dir;

        while id != APFS_ROOT_DIR_PARENT {
            if chain.len() > self.known_dirs.len() {
                return Err(Error::corrupt(format!("directory {dir} has a cyclic parent chain")));
            }
            let Some(known) = self.known_dirs.get(&id) else {
                return Err(Error::corrupt(format!("directory {dir} has unknown ancestor {id}")));
            };
            chain.push(id);
            id = known.parent;
        }

        chain.reverse();
        Ok(chain)
    }

    fn navigate_to<M: Materializer>(&mut self, dir: u64, m: &mut M) -> Result<()> {
        let _span = tracy::span!("TraversalState::navigate_to");

        if self.ancestors.last() == Some(&dir) {
            return Ok(());
        }

        let chain = self.chain_to(dir)?;
        let common = self.ancestors.iter()
            .zip(chain.iter())
            .take_while(|(a, b)| a == b)
            .count();

        while self.ancestors.len() > common {
            m.leave_directory()?;
            self.ancestors.pop();
        }

        for &id in &chain[common..] {
            let name = match self.known_dirs.get(&id) {
                Some(known) => known.name.as_str(),
                None => return Err(Error::corrupt(format!("directory {id} vanished"))),
            };
            m.enter_directory(name)?;
            self.ancestors.push(id);
            self.summary.directories += 1;
        }

        Ok(())
    }
}

/// Walk every fs record of `volume`, leaving the traversal stack empty.
pub fn walk_volume<S: ByteSource, M: Materializer>(
    reader: &BlockReader<S>,
    volume: &Volume,
    m:      &mut M,
) -> Result<WalkSummary> {
    let _span = tracy::span!("walk_volume");

    let omap = volume.omap(reader)?;
    let root_addr = volume.fs_root_addr(reader, &omap)?;
    log::info!("walking volume {:?}: fs tree root at {root_addr:#x}", volume.name());

    let mut state = TraversalState::new(volume.name());

    let tree = btree::traverse(
        reader,
        root_addr,
        None,
        |child| omap.resolve_addr(reader, child),
        |entry| {
            let record = decode_record(entry.key, entry.value)?;
            state.apply(record, reader, m)
        },
    )?;

    state.finish(m)?;

    let mut summary = state.summary();
    summary.tree = tree;
    Ok(summary)
}

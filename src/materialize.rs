//! Output side of a filesystem walk.
//!
//! The walker drives a [`Materializer`] with directory enter/leave events and
//! file extents; implementations decide what "materializing" means.  None of
//! them touch the process working directory.

use crate::error::{Error, Result};
use crate::source::{BlockReader, ByteSource};
use crate::tracy;

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub trait Materializer {
    /// Descend into child directory `name` of the current directory.
    fn enter_directory(&mut self, name: &str) -> Result<()>;

    /// Return to the parent of the current directory.
    fn leave_directory(&mut self) -> Result<()>;

    /// A file named `name` of `size` bytes lives in the current directory.
    fn report_file(&mut self, name: &str, size: u64) -> Result<()>;

    /// Append `len` bytes starting at physical block `phys_block` to file
    /// `file_name` in the current directory.
    fn append_extent<S: ByteSource>(
        &mut self,
        reader:     &BlockReader<S>,
        file_name:  &str,
        phys_block: u64,
        len:        u64,
    ) -> Result<()>;
}

/// Copy `len` bytes from `phys_block` onward into `out`, one block at a time.
pub fn copy_extent<S: ByteSource, W: Write>(
    reader:     &BlockReader<S>,
    phys_block: u64,
    len:        u64,
    out:        &mut W,
) -> Result<u64> {
    let _span = tracy::span!("copy_extent");

    let bs = reader.block_size() as u64;
    let mut buf = vec![0u8; bs as usize];
    let mut offset = reader.block_offset(phys_block)?;
    let mut remaining = len;

    while remaining > 0 {
        let chunk = remaining.min(bs) as usize;
        reader.read_exact_at(&mut buf[..chunk], offset)?;
        out.write_all(&buf[..chunk])?;
        offset += chunk as u64;
        remaining -= chunk as u64;
    }

    Ok(len)
}

// ─────────────────────────────────────────────────────────────────────────────
// Host filesystem
// ─────────────────────────────────────────────────────────────────────────────

/// Recreates the hierarchy under `root` on the host filesystem.
pub struct HostMaterializer {
    current: PathBuf,
    depth:   usize,
    /// Directories this run created; re-entering them is not a conflict
    created: HashSet<PathBuf>,
    pub bytes_written: u64,
}

impl HostMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            current: root.into(),
            depth: 0,
            created: HashSet::new(),
            bytes_written: 0,
        }
    }

    #[inline(always)]
    pub fn current_dir(&self) -> &Path {
        &self.current
    }

    #[inline(always)]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    fn open_output(path: &Path, truncate: bool) -> Result<fs::File> {
        let mut opts = OpenOptions::new();
        if truncate {
            opts.write(true).create(true).truncate(true);
        } else {
            opts.append(true).create(true);
        }
        opts.open(path).map_err(|source| Error::OutputFile { path: path.to_owned(), source })
    }
}

/// Host path component for an APFS name: no separators, no `.`/`..`.
fn sanitize(name: &str) -> String {
    match name {
        "" | "." | ".." => format!("_{name}_"),
        _ => name.replace(['/', '\0'], "_"),
    }
}

impl Materializer for HostMaterializer {
    fn enter_directory(&mut self, name: &str) -> Result<()> {
        let path = self.current.join(sanitize(name));

        if !self.created.contains(&path) {
            match fs::create_dir(&path) {
                Ok(()) => {
                    log::debug!("created {}", path.display());
                    self.created.insert(path.clone());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(Error::DirectoryExists { path });
                }
                Err(e) => return Err(Error::OutputFile { path, source: e }),
            }
        }

        self.current = path;
        self.depth += 1;
        Ok(())
    }

    fn leave_directory(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::corrupt("leave_directory above the output root"));
        }
        self.current.pop();
        self.depth -= 1;
        Ok(())
    }

    fn report_file(&mut self, name: &str, _size: u64) -> Result<()> {
        let path = self.current.join(sanitize(name));
        Self::open_output(&path, true)?;
        Ok(())
    }

    fn append_extent<S: ByteSource>(
        &mut self,
        reader:     &BlockReader<S>,
        file_name:  &str,
        phys_block: u64,
        len:        u64,
    ) -> Result<()> {
        let _span = tracy::span!("HostMaterializer::append_extent");

        let path = self.current.join(sanitize(file_name));
        let mut out = io::BufWriter::new(Self::open_output(&path, false)?);
        self.bytes_written += copy_extent(reader, phys_block, len, &mut out)?;
        out.flush()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree printer (dry run)
// ─────────────────────────────────────────────────────────────────────────────

/// Prints the hierarchy instead of writing it: directories end in `/`, files
/// carry their size, two spaces of indent per level.
pub struct TreePrinter<W> {
    out:   W,
    depth: usize,
    pub files:       u64,
    pub directories: u64,
    pub bytes:       u64,
}

impl<W: Write> TreePrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, depth: 0, files: 0, directories: 0, bytes: 0 }
    }

    #[inline]
    pub fn into_inner(self) -> W {
        self.out
    }

    #[inline]
    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }
}

impl<W: Write> Materializer for TreePrinter<W> {
    fn enter_directory(&mut self, name: &str) -> Result<()> {
        writeln!(self.out, "{}{name}/", self.indent())?;
        self.depth += 1;
        self.directories += 1;
        Ok(())
    }

    fn leave_directory(&mut self) -> Result<()> {
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn report_file(&mut self, name: &str, size: u64) -> Result<()> {
        writeln!(self.out, "{}{name} ({size} bytes)", self.indent())?;
        self.files += 1;
        Ok(())
    }

    fn append_extent<S: ByteSource>(
        &mut self,
        _reader:     &BlockReader<S>,
        _file_name:  &str,
        _phys_block: u64,
        len:         u64,
    ) -> Result<()> {
        self.bytes += len;
        Ok(())
    }
}

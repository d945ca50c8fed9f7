use clap::{ArgAction, Parser};

use crate::source::ReaderOptions;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

static COLOR_DISABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn disable_ansi_coloring() {
    COLOR_DISABLED.store(true, Ordering::Relaxed);
}

/// Colors only go to a terminal, and never when `NO_COLOR` is set.
#[inline]
pub fn should_enable_ansi_coloring() -> bool {
    !COLOR_DISABLED.load(Ordering::Relaxed)
        && std::env::var_os("NO_COLOR").is_none()
        && std::io::stderr().is_terminal()
}

/// Exit status for a command line clap rejected: 1 for malformed or missing
/// arguments, 0 when it only asked for `--help` or `--version`.
#[inline]
pub fn usage_exit_code(e: &clap::Error) -> i32 {
    if e.use_stderr() { 1 } else { 0 }
}

#[derive(Parser)]
#[command(
    name = "apfsdump",
    about = "Read-only APFS decoder: checkpoints, volumes and file trees from raw images and .dmg files",
    long_about = None,
    version = "1.0",
    arg_required_else_help = true,
)]
pub struct Cli {
    /// Raw APFS container image or UDIF (.dmg) disk image
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Print the newest container superblock and every older checkpoint
    #[arg(short = 'c', long = "container", conflicts_with_all = ["volume", "fs"])]
    pub container: bool,

    /// Print volume superblocks: all of them, or the one with object id ID
    #[arg(short = 'v', long = "volume", value_name = "ID", num_args = 0..=1, conflicts_with = "fs")]
    pub volume: Option<Option<u64>>,

    /// Rebuild the directory tree and file contents of every volume
    #[arg(short = 'f', long = "fs")]
    pub fs: bool,

    /// Directory the volume trees are rebuilt under
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = ".")]
    pub output: PathBuf,

    /// With --fs, print the tree instead of writing it
    #[arg(long = "dry-run", requires = "fs")]
    pub dry_run: bool,

    /// Verify the Fletcher-64 checksum of every object read
    #[arg(long = "verify-checksums")]
    pub verify_checksums: bool,

    /// Where the flat partition image of a .dmg input is written
    ///
    /// Defaults to <IMAGE stem>.partition<N>.img in the working directory
    #[arg(long = "image-out", value_name = "PATH")]
    pub image_out: Option<PathBuf>,

    /// Increase diagnostic output (can be repeated)
    ///
    /// -d: info, -dd: debug, -ddd: trace.  RUST_LOG overrides.
    #[arg(short = 'd', long = "debug", action = ArgAction::Count)]
    pub debug: u8,

    /// Disable ANSI coloring of diagnostics
    #[arg(long = "no-color")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Partition table for a .dmg, container summary for a raw image
    Structure,
    Container,
    Volumes(Option<u64>),
    FileSystem,
}

impl Cli {
    #[inline]
    pub fn mode(&self) -> Mode {
        if self.container {
            Mode::Container
        } else if let Some(id) = self.volume {
            Mode::Volumes(id)
        } else if self.fs {
            Mode::FileSystem
        } else {
            Mode::Structure
        }
    }

    #[inline(always)]
    pub const fn reader_options(&self) -> ReaderOptions {
        ReaderOptions { verify_checksums: self.verify_checksums }
    }

    #[inline(always)]
    pub const fn log_filter(&self) -> &'static str {
        match self.debug {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

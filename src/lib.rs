#[macro_use]
pub mod util;

pub mod cli;
pub mod error;
pub mod image;
pub mod materialize;
pub mod source;
pub mod tracy;

pub mod apfs {
    mod apfs;
    pub use apfs::*;

    pub mod btree;
    pub mod checkpoint;
    pub mod checksum;
    pub mod fs;
    pub mod omap;
    pub mod parser;
    pub mod volume;
    pub mod walker;
}

pub mod dmg {
    mod dmg;
    pub use dmg::*;

    pub mod parser;
    pub mod plist;
}

#[cfg(test)]
mod testkit;

pub use error::{Error, Result};

use std::{fs::File, io};

#[inline]
pub fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(b)
}

#[inline]
pub fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(b)
}

#[inline]
pub fn read_u64_le(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(b)
}

#[inline]
pub fn read_u32_be(buf: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(b)
}

#[inline]
pub fn read_u64_be(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(b)
}

/// Bytes up to the first NUL, lossily decoded.
#[inline]
pub fn cstr_lossy(bytes: &[u8]) -> String {
    let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[inline]
pub fn read_at_offset(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    #[cfg(unix)] {
        use std::os::unix::fs::FileExt;
        file.read_at(buf, offset)
    }

    #[cfg(windows)] {
        use std::os::windows::fs::FileExt;
        file.seek_read(buf, offset)
    }
}

#[inline]
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;

    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[macro_export]
macro_rules! eprintln_red {
    ($($arg:tt)*) => {{
        if $crate::cli::should_enable_ansi_coloring() {
            eprintln!(concat!("\x1b[1;31m", "{}", "\x1b[0m"), format_args!($($arg)*));
        } else {
            eprintln!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! eprintln_yellow {
    ($($arg:tt)*) => {{
        if $crate::cli::should_enable_ansi_coloring() {
            eprintln!(concat!("\x1b[1;33m", "{}", "\x1b[0m"), format_args!($($arg)*));
        } else {
            eprintln!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! eprintln_green {
    ($($arg:tt)*) => {{
        if $crate::cli::should_enable_ansi_coloring() {
            eprintln!(concat!("\x1b[1;32m", "{}", "\x1b[0m"), format_args!($($arg)*));
        } else {
            eprintln!($($arg)*);
        }
    }};
}

// eprint! versions (no newline)
#[macro_export]
macro_rules! eprint_green {
    ($($arg:tt)*) => {{
        if $crate::cli::should_enable_ansi_coloring() {
            eprint!(concat!("\x1b[1;32m", "{}", "\x1b[0m"), format_args!($($arg)*));
        } else {
            eprint!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! eprint_blue {
    ($($arg:tt)*) => {{
        if $crate::cli::should_enable_ansi_coloring() {
            eprint!(concat!("\x1b[1;34m", "{}", "\x1b[0m"), format_args!($($arg)*));
        } else {
            eprint!($($arg)*);
        }
    }};
}

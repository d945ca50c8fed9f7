//! Fletcher-64 object checksums.
//!
//! Computed over 32-bit little-endian words of the object, skipping the
//! 8-byte checksum field itself.  Both running sums are kept modulo 2^32-1.

use super::APFS_OBJ_CKSUM_SIZE;

const MOD: u64 = 0xFFFF_FFFF;

pub fn fletcher64(block: &[u8]) -> u64 {
    let data = block.get(APFS_OBJ_CKSUM_SIZE..).unwrap_or_default();

    let mut sum1 = 0u64;
    let mut sum2 = 0u64;
    for word in data.chunks_exact(4) {
        let w = u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as u64;
        sum1 = (sum1 + w) % MOD;
        sum2 = (sum2 + sum1) % MOD;
    }

    let c1 = MOD - ((sum1 + sum2) % MOD);
    let c2 = MOD - ((sum1 + c1) % MOD);
    (c2 << 32) | c1
}

#[inline]
pub fn stored(block: &[u8]) -> u64 {
    let mut b = [0u8; APFS_OBJ_CKSUM_SIZE];
    if let Some(src) = block.get(..APFS_OBJ_CKSUM_SIZE) {
        b.copy_from_slice(src);
    }
    u64::from_le_bytes(b)
}

#[inline]
pub fn is_valid(block: &[u8]) -> bool {
    block.len() > APFS_OBJ_CKSUM_SIZE && stored(block) == fletcher64(block)
}

/// Stamp the checksum field of `block` with its Fletcher-64 value.
pub fn seal(block: &mut [u8]) {
    let sum = fletcher64(block);
    if let Some(dst) = block.get_mut(..APFS_OBJ_CKSUM_SIZE) {
        dst.copy_from_slice(&sum.to_le_bytes());
    }
}

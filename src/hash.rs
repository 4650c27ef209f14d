//! Key hashing: murmur3 (x86, 32-bit) and bucket index computation.
//!
//! The hash is fixed rather than pluggable. Bucket placement must be a pure
//! function of the key bytes so that a table rebuilt from the same keys
//! has the same layout.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 x86 32-bit over `data` with the given `seed`.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= scramble(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .enumerate()
            .fold(0u32, |k, (i, &b)| k | (u32::from(b) << (8 * i)));
        h ^= scramble(k);
    }

    // Only the low 32 bits of the length take part, as in the reference.
    fmix32(h ^ data.len() as u32)
}

#[inline]
fn scramble(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Bucket index of `key` in a table of `table_size` buckets.
///
/// `table_size` must be a power of two; the mask is the modulo.
#[inline]
pub fn bucket_index(key: &[u8], table_size: usize) -> usize {
    debug_assert!(table_size.is_power_of_two());
    murmur3_32(key, 0) as usize & (table_size - 1)
}

/// The key as the table sees it: everything before the first NUL byte.
///
/// Keys are terminator-delimited byte strings. A caller passing a slice
/// with an embedded NUL addresses the key formed by the bytes before it.
#[inline]
pub fn terminated(key: &[u8]) -> &[u8] {
    match memchr::memchr(0, key) {
        Some(end) => &key[..end],
        None => key,
    }
}

//! 64-bit keying for cache identities.
//!
//! Pattern keys and result keys are derived with the MurmurHash3 x64-128
//! construction, keeping the low 64 bits of the 128-bit output. The hash is
//! collision-resistant enough for caching, deterministic across threads and
//! process lifetime, and explicitly not cryptographic.

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// MurmurHash3 x64-128 over `data` with the given seed.
pub fn murmur3_x64_128(data: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;
    let nblocks = data.len() / 16;

    for block in data.chunks_exact(16) {
        // chunks_exact(16) guarantees both conversions succeed
        let k1 = u64::from_le_bytes(block[0..8].try_into().unwrap());
        let k2 = u64::from_le_bytes(block[8..16].try_into().unwrap());

        h1 ^= k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = &data[nblocks * 16..];
    if tail.len() > 8 {
        let mut k2: u64 = 0;
        for (i, &b) in tail[8..].iter().enumerate() {
            k2 ^= (b as u64) << (i * 8);
        }
        h2 ^= k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
    }
    if !tail.is_empty() {
        let mut k1: u64 = 0;
        for (i, &b) in tail[..tail.len().min(8)].iter().enumerate() {
            k1 ^= (b as u64) << (i * 8);
        }
        h1 ^= k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
    }

    h1 ^= data.len() as u64;
    h2 ^= data.len() as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// Low 64 bits of the 128-bit MurmurHash3 output.
#[inline]
pub fn hash64(data: &[u8], seed: u64) -> u64 {
    murmur3_x64_128(data, seed).0
}

/// Cache identity of a compiled pattern.
///
/// The case-sensitivity flag participates in the key as a trailing marker
/// byte, so the same pattern text compiled case-sensitively and
/// case-insensitively occupies two distinct cache slots.
pub fn pattern_key(pattern: &str, case_sensitive: bool) -> u64 {
    let mut buf = Vec::with_capacity(pattern.len() + 1);
    buf.extend_from_slice(pattern.as_bytes());
    buf.push(if case_sensitive { 1 } else { 0 });
    hash64(&buf, 0)
}

/// Cache identity of a (pattern, input) match outcome.
///
/// The two hashes are XOR-combined with a rotation to break symmetry, then
/// pushed through a splitmix64-style finalizer so identical inputs matched
/// against different patterns do not collide trivially.
pub fn result_key(pattern_hash: u64, input_hash: u64) -> u64 {
    let mut z = pattern_hash ^ input_hash.rotate_left(32);
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

//! Deterministic visitor allocation
//!
//! Visitors are bucketed with 32-bit MurmurHash3 over the UTF-16 code units
//! of `client.seed.visitor`, seed 0. The hash and the modulo/scale order
//! must stay bit-for-bit stable: every platform that serves the same
//! artifact has to put a visitor in the same experience.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;
const BUCKETS: u32 = 10_000;

/// MurmurHash3 x86_32 over UTF-16 code units, seed 0
pub fn hash_unencoded_chars(input: &str) -> i32 {
    let units: Vec<u16> = input.encode_utf16().collect();
    let mut h1: u32 = 0;

    for pair in units.chunks_exact(2) {
        let k1 = u32::from(pair[0]) | (u32::from(pair[1]) << 16);
        h1 = mix_h1(h1, mix_k1(k1));
    }

    if units.len() % 2 == 1 {
        if let Some(&last) = units.last() {
            h1 ^= mix_k1(u32::from(last));
        }
    }

    fmix(h1, (2 * units.len()) as u32) as i32
}

fn mix_k1(k1: u32) -> u32 {
    k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn mix_h1(h1: u32, k1: u32) -> u32 {
    (h1 ^ k1)
        .rotate_left(13)
        .wrapping_mul(5)
        .wrapping_add(0xe654_6b64)
}

fn fmix(mut h1: u32, length: u32) -> u32 {
    h1 ^= length;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Visitor id with its location-hint suffix removed
pub fn truncate_visitor_id(visitor_id: &str) -> &str {
    match visitor_id.find('.') {
        Some(idx) if idx > 0 => &visitor_id[..idx],
        _ => visitor_id,
    }
}

/// Bucket in `0..10000` for a client, experiment seed and visitor
pub fn bucket(client: &str, seed: &str, visitor_id: &str) -> u32 {
    let input = format!("{}.{}.{}", client, seed, truncate_visitor_id(visitor_id));
    hash_unencoded_chars(&input).unsigned_abs() % BUCKETS
}

/// Allocation in `[0, 100)` for a client, experiment seed and visitor
pub fn allocate(client: &str, seed: &str, visitor_id: &str) -> f64 {
    f64::from(bucket(client, seed, visitor_id)) / f64::from(BUCKETS) * 100.0
}

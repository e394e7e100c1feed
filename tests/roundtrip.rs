//! End-to-end checks: diff through the framing layer, apply the result,
//! and require byte-exact reconstruction.

use bsdelta::{DiffContext, NoProgress, patch, simple_diff};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

fn diff_bytes(older: &[u8], newer: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    simple_diff(older, newer, &mut buf).unwrap();
    buf
}

fn roundtrip(older: &[u8], newer: &[u8]) {
    let patch_bytes = diff_bytes(older, newer);
    let mut out = Vec::new();
    let written = patch::apply(&patch_bytes[..], older, &mut out).unwrap();
    assert_eq!(written, newer.len() as u64);
    assert_eq!(out, newer, "reconstruction must match newer exactly");
}

fn record_count(older: &[u8], newer: &[u8]) -> usize {
    let mut records = 0;
    DiffContext::new()
        .diff(
            older,
            newer,
            |c| {
                if !c.eof {
                    records += 1;
                }
                Ok(())
            },
            &mut NoProgress,
        )
        .unwrap();
    records
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0_u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

#[test]
fn identical_buffers() {
    roundtrip(b"abcdefgh", b"abcdefgh");
    let big = random_bytes(1, 100_000);
    roundtrip(&big, &big);
}

#[test]
fn empty_boundaries() {
    roundtrip(b"", b"");
    roundtrip(b"", b"hello");
    roundtrip(b"hello", b"");
}

#[test]
fn single_byte_flip() {
    let older = random_bytes(2, 10_000);
    let mut newer = older.clone();
    newer[4321] ^= 0x55;
    roundtrip(&older, &newer);
    assert!(record_count(&older, &newer) <= 2);
}

#[test]
fn rewritten_region_in_a_megabyte() {
    let older = random_bytes(3, 1 << 20);
    let mut newer = older.clone();
    let replacement = random_bytes(4, 100);
    newer[500_000..500_100].copy_from_slice(&replacement);

    roundtrip(&older, &newer);
    assert!(record_count(&older, &newer) <= 8);
}

#[test]
fn appended_and_truncated_data() {
    let older = random_bytes(5, 50_000);

    let mut appended = older.clone();
    appended.extend_from_slice(&random_bytes(6, 10_000));
    roundtrip(&older, &appended);

    let truncated = &older[..30_000];
    roundtrip(&older, truncated);

    let mut prepended = random_bytes(7, 5_000);
    prepended.extend_from_slice(&older);
    roundtrip(&older, &prepended);
}

#[test]
fn text_rewrites() {
    roundtrip(b"the quick brown fox", b"the quick red fox");
    roundtrip(
        b"a moderately long sentence with several repeated words, repeated words",
        b"a moderately short sentence with several repeated words, repeated verbs",
    );
}

#[test]
fn shuffled_blocks() {
    let older = random_bytes(8, 64 * 1024);
    let mut newer = Vec::with_capacity(older.len());
    // move the tail half in front of the head half
    newer.extend_from_slice(&older[32 * 1024..]);
    newer.extend_from_slice(&older[..32 * 1024]);
    roundtrip(&older, &newer);
}

#[test]
fn patches_are_deterministic() {
    let older = random_bytes(9, 200_000);
    let mut newer = older.clone();
    newer[100_000..100_500].copy_from_slice(&random_bytes(10, 500));

    assert_eq!(diff_bytes(&older, &newer), diff_bytes(&older, &newer));
}

#[test]
fn unrelated_inputs_still_reconstruct() {
    let older = random_bytes(11, 40_000);
    let newer = random_bytes(12, 37_000);
    roundtrip(&older, &newer);
}

// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

pub type Hash32 = [u8; 32];

pub const ZERO_HASH: Hash32 = [0u8; 32];

pub mod schnorr;
pub use schnorr::{schnorr_sign, schnorr_verify, SchnorrKeypair};
pub mod sum_tree;
pub use sum_tree::{
    sample_indices, sum_leaf, sum_pair_hash, sum_parent, verify_sum_branch, BranchCheck, SumNode,
    SumTree,
};

/// Compute BLAKE3-256 (32 bytes) digest
pub fn blake3_32(data: &[u8]) -> Hash32 {
    use blake3::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// Domain-separierter Hash über mehrere Teile: H(domain || parts[0] || parts[1] || ...)
pub fn blake3_domain(domain: &[u8], parts: &[&[u8]]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    for p in parts {
        hasher.update(p);
    }
    *hasher.finalize().as_bytes()
}

/// Byteweises XOR zweier 32-Byte-Werte
pub fn xor32(a: &Hash32, b: &Hash32) -> Hash32 {
    let mut out = [0u8; 32];
    for ((o, x), y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        *o = x ^ y;
    }
    out
}

const MRKL_PAIR_DOMAIN: &[u8] = b"por:mrkl:pair:v1\x01";

/// Merkle-Root über bereits 32-Byte-Leaves (Dupliziere letztes Leaf bei ungerader Anzahl).
/// Leerer Baum → 32 Byte Null (definiert: Merkle-Root(empty)=0x00..00)
pub fn merkle_root_hashes(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    let mut level: Vec<Hash32> = leaves.to_vec();
    while level.len() > 1 {
        let mut next: Vec<Hash32> = Vec::with_capacity(level.len().div_ceil(2));
        let mut it = level.iter();
        while let Some(left) = it.next() {
            let right = it.next().unwrap_or(left);
            next.push(blake3_domain(MRKL_PAIR_DOMAIN, &[left, right]));
        }
        level = next;
    }
    level.pop().unwrap_or_default()
}

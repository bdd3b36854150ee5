//! Hashing helpers for values and batch commitments

use crate::Hash32;

const DOMAIN_PUT: &[u8] = b"put";
const DOMAIN_DELETE: &[u8] = b"del";

pub fn hash_value(value: &[u8]) -> Hash32 {
    blake3::hash(value).into()
}

/// Canonical hash for "no value" (deletes, absent keys)
pub fn empty_value_hash() -> Hash32 {
    [0u8; 32]
}

/// op = H(tag || key_hash || value_hash)
pub fn hash_op(is_delete: bool, key: &[u8], value_hash: Hash32) -> Hash32 {
    let mut h = blake3::Hasher::new();
    h.update(if is_delete { DOMAIN_DELETE } else { DOMAIN_PUT });
    h.update(blake3::hash(key).as_bytes());
    h.update(&value_hash);
    h.finalize().into()
}

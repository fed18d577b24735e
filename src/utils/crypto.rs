// src/utils/crypto.rs
//! Hashing and random-token helpers.
//!
//! SHA-256 comes from `ring`; it is the only digest the issuer binds into
//! signing authorizations.

use crate::utils::serialization::encode_base64url;
use rand::RngCore;
use ring::digest::{digest, SHA256};

/// Length in bytes of generated opaque tokens (128 bits).
const TOKEN_BYTES: usize = 16;

/// Computes the SHA-256 digest of `data`.
///
/// # Arguments
/// * `data` - Binary data to hash
///
/// # Returns
/// Fixed-size 32-byte digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, data).as_ref());
    out
}

/// SHA-256 digest of `data`, standard base64 encoded (the form CSC
/// `documentDigests` expect).
pub fn sha256_base64(data: &[u8]) -> String {
    base64::encode(sha256(data))
}

/// Generates an opaque, URL-safe, 128-bit random token.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    encode_base64url(&bytes)
}

// src/lib.rs

//! # Verifiable Credential Issuer
//!
//! Issuance core of a verifiable-credential issuer: the credential procedure
//! lifecycle, one-time code exchange for deferred issuance, proof-of-possession
//! validation and remote signing with retry and async fallback.
//!
//! ## Layout
//! - `models`: procedure, deferred record, signing and token shapes
//! - `storage`: nonce store and repository traits with in-memory backends
//! - `services`: the issuance components and the HTTP surface
//! - `utils`: hashing, base64url and compact-token helpers

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use error::{IssuerError, Result};

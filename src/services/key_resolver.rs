// src/services/key_resolver.rs
//! `did:key` resolution and compact-token signature verification.
//!
//! Only P-256 keys are supported. A `did:key` identifier carries the key
//! directly:
//! `did:key:z<base58btc(0x80 0x24 || SEC1 point)>[#<same value>]`.
//!
//! Uses the following primitives:
//! - base58 (bitcoin alphabet) via `bs58`
//! - P-256 ECDSA via `p256`, with point decompression for compressed keys

use crate::error::{IssuerError, Result};
use crate::utils::jwt::CompactToken;
use log::debug;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};

const DID_KEY_PREFIX: &str = "did:key:";
const MULTIBASE_BASE58BTC: char = 'z';
/// Unsigned-varint encoding of the `p256-pub` multicodec (0x1200).
const P256_MULTICODEC: [u8; 2] = [0x80, 0x24];

/// Resolves verification keys from key identifiers and verifies tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyResolver;

impl KeyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Decodes a `did:key` identifier into a P-256 verifying key.
    ///
    /// # Arguments
    /// * `key_id` - `did:key:z...`, optionally followed by a `#z...` fragment
    ///
    /// # Errors
    /// `IssuerError::InvalidKeyId` when the identifier is not a `did:key`,
    /// is not base58btc multibase, does not carry the P-256 multicodec or
    /// does not hold a point on the curve.
    pub fn resolve_public_key(&self, key_id: &str) -> Result<VerifyingKey> {
        let method_specific = key_id
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| invalid(key_id, "not a did:key identifier"))?;

        let encoded = match method_specific.split_once('#') {
            Some((_, fragment)) => fragment,
            None => method_specific,
        };

        let multibase = encoded
            .strip_prefix(MULTIBASE_BASE58BTC)
            .ok_or_else(|| invalid(key_id, "missing base58btc multibase prefix"))?;

        let bytes = bs58::decode(multibase)
            .into_vec()
            .map_err(|e| invalid(key_id, &format!("base58 decoding failed: {e}")))?;

        let point = bytes
            .strip_prefix(&P256_MULTICODEC)
            .ok_or_else(|| invalid(key_id, "not a P-256 multicodec key"))?;

        VerifyingKey::from_sec1_bytes(point)
            .map_err(|_| invalid(key_id, "not a valid P-256 point"))
    }

    /// Verifies the ES256 signature of a compact token.
    ///
    /// # Returns
    /// `false` for malformed tokens as well as for bad signatures.
    pub fn verify(&self, token: &str, key: &VerifyingKey) -> bool {
        let verified = CompactToken::parse(token).and_then(|compact| {
            let signature = Signature::from_slice(&compact.signature_bytes()?)
                .map_err(|e| IssuerError::MalformedToken(format!("signature: {e}")))?;
            Ok(key
                .verify(compact.signing_input().as_bytes(), &signature)
                .is_ok())
        });

        match verified {
            Ok(valid) => valid,
            Err(e) => {
                debug!("token not verifiable: {}", e);
                false
            }
        }
    }
}

/// Encodes a P-256 key as a `did:key` identifier (compressed point).
pub fn encode_did_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(true);
    let mut bytes = P256_MULTICODEC.to_vec();
    bytes.extend_from_slice(point.as_bytes());
    format!(
        "{}{}{}",
        DID_KEY_PREFIX,
        MULTIBASE_BASE58BTC,
        bs58::encode(bytes).into_string()
    )
}

/// Strips the fragment of a key identifier, leaving the DID.
pub fn did_of(key_id: &str) -> &str {
    key_id.split_once('#').map_or(key_id, |(did, _)| did)
}

fn invalid(key_id: &str, reason: &str) -> IssuerError {
    IssuerError::InvalidKeyId(format!("{key_id}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{es256_token, test_signing_key};
    use serde_json::json;

    #[test]
    fn test_round_trip_compressed_did_key() {
        let signing_key = test_signing_key();
        let verifying_key = VerifyingKey::from(&signing_key);
        let did = encode_did_key(&verifying_key);

        assert!(did.starts_with("did:key:zDn"));
        let resolved = KeyResolver::new().resolve_public_key(&did).unwrap();
        assert_eq!(resolved, verifying_key);
    }

    #[test]
    fn test_fragment_form_resolves_same_key() {
        let verifying_key = VerifyingKey::from(&test_signing_key());
        let did = encode_did_key(&verifying_key);
        let fragment = did.trim_start_matches("did:key:");
        let key_id = format!("{did}#{fragment}");

        let resolved = KeyResolver::new().resolve_public_key(&key_id).unwrap();
        assert_eq!(resolved, verifying_key);
        assert_eq!(did_of(&key_id), did);
    }

    #[test]
    fn test_uncompressed_point_is_accepted() {
        let verifying_key = VerifyingKey::from(&test_signing_key());
        let mut bytes = P256_MULTICODEC.to_vec();
        bytes.extend_from_slice(verifying_key.to_encoded_point(false).as_bytes());
        let did = format!("did:key:z{}", bs58::encode(bytes).into_string());

        let resolved = KeyResolver::new().resolve_public_key(&did).unwrap();
        assert_eq!(resolved, verifying_key);
    }

    #[test]
    fn test_malformed_key_ids_are_errors() {
        let resolver = KeyResolver::new();
        for key_id in [
            "did:web:example.com",
            "did:key:abc",
            "did:key:z0OIl",
            // ed25519 multicodec prefix
            "did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK",
            "did:key:z",
        ] {
            assert!(
                matches!(
                    resolver.resolve_public_key(key_id),
                    Err(IssuerError::InvalidKeyId(_))
                ),
                "{key_id} should be rejected"
            );
        }
    }

    #[test]
    fn test_verify_accepts_valid_and_rejects_flipped_signature() {
        let signing_key = test_signing_key();
        let resolver = KeyResolver::new();
        let token = es256_token(
            &signing_key,
            json!({"alg": "ES256", "typ": "JWT"}),
            json!({"sub": "holder"}),
        );
        assert!(resolver.verify(&token, signing_key.verifying_key()));

        let (input, signature) = token.rsplit_once('.').unwrap();
        let mut bytes = crate::utils::serialization::decode_base64url(signature).unwrap();
        bytes[10] ^= 0x01;
        let tampered = format!(
            "{}.{}",
            input,
            crate::utils::serialization::encode_base64url(&bytes)
        );
        assert!(!resolver.verify(&tampered, signing_key.verifying_key()));
    }

    #[test]
    fn test_verify_rejects_other_key_and_garbage() {
        let resolver = KeyResolver::new();
        let token = es256_token(
            &test_signing_key(),
            json!({"alg": "ES256"}),
            json!({"sub": "holder"}),
        );
        let other = test_signing_key();
        assert!(!resolver.verify(&token, other.verifying_key()));
        assert!(!resolver.verify("not-a-token", other.verifying_key()));
    }
}

// src/services/proof_validator.rs
//! Holder proof-of-possession validation.
//!
//! A proof is a compact ES256 token whose key is named by a `did:key` in the
//! `kid` header and whose `nonce` claim must be a live, server-issued
//! `c_nonce`. Nonces are bound to the access token they were issued for and
//! are consumed by the first successful validation, so a captured proof
//! cannot be replayed.

use crate::error::{IssuerError, Result};
use crate::models::token::ProofClaims;
use crate::services::key_resolver::{did_of, KeyResolver};
use crate::storage::nonce_store::NonceStore;
use crate::utils::jwt::{decode_claims, decode_header};
use chrono::Utc;
use jsonwebtoken::Algorithm;
use log::debug;
use std::sync::Arc;

/// Media type every proof header must declare.
pub const PROOF_MEDIA_TYPE: &str = "openid4vci-proof+jwt";

/// Tolerated clock drift for `iat` in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// A proof that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProof {
    /// DID of the holder key, fragment stripped
    pub holder_did: String,
    pub claims: ProofClaims,
}

/// Validates proof tokens against the key resolver and the nonce store.
pub struct ProofValidator {
    key_resolver: KeyResolver,
    nonces: Arc<dyn NonceStore>,
}

impl ProofValidator {
    pub fn new(key_resolver: KeyResolver, nonces: Arc<dyn NonceStore>) -> Self {
        Self {
            key_resolver,
            nonces,
        }
    }

    /// Mints a `c_nonce` bound to `access_token`.
    ///
    /// # Returns
    /// The nonce and its lifetime in seconds.
    pub async fn issue_nonce(&self, access_token: &str) -> (String, u64) {
        let nonce = self.nonces.add("", access_token).await;
        (nonce, self.nonces.expiry_seconds())
    }

    /// Boolean form of [`ProofValidator::validate`]; never errors.
    pub async fn is_proof_valid(&self, proof: &str, access_token: &str) -> bool {
        match self.validate(proof, access_token).await {
            Ok(_) => true,
            Err(e) => {
                debug!("proof rejected: {}", e);
                false
            }
        }
    }

    /// Runs every proof check and consumes the nonce on success.
    ///
    /// # Process Flow
    /// 1. Parses the header; algorithm and media type must match exactly
    /// 2. Decodes the claims; `aud`, `iat` and a future `exp` are required,
    ///    and `iat` must be neither ahead of the clock (beyond a small skew)
    ///    nor older than the nonce lifetime
    /// 3. Resolves the `kid` and verifies the signature
    /// 4. Checks the nonce is live and bound to `access_token`, then consumes it
    ///
    /// # Errors
    /// `IssuerError::MalformedToken`, `IssuerError::InvalidKeyId` or
    /// `IssuerError::InvalidProof`, naming the failed step.
    pub async fn validate(&self, proof: &str, access_token: &str) -> Result<ValidatedProof> {
        let header = decode_header(proof)?;
        if header.alg != Algorithm::ES256 {
            return Err(IssuerError::InvalidProof(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        if header.typ.as_deref() != Some(PROOF_MEDIA_TYPE) {
            return Err(IssuerError::InvalidProof(format!(
                "unexpected typ {:?}",
                header.typ
            )));
        }

        let claims: ProofClaims = decode_claims(proof)?;
        if claims.aud.is_null() {
            return Err(IssuerError::InvalidProof("missing audience".into()));
        }
        let now = Utc::now().timestamp();
        if claims.exp <= now {
            return Err(IssuerError::InvalidProof("proof expired".into()));
        }
        if claims.iat > now + MAX_CLOCK_SKEW_SECS {
            return Err(IssuerError::InvalidProof("proof issued in the future".into()));
        }
        let max_age = i64::try_from(self.nonces.expiry_seconds()).unwrap_or(i64::MAX);
        if claims.iat < now.saturating_sub(max_age) {
            return Err(IssuerError::InvalidProof("proof issued too long ago".into()));
        }

        let key_id = header
            .kid
            .ok_or_else(|| IssuerError::InvalidProof("missing kid".into()))?;
        let key = self.key_resolver.resolve_public_key(&key_id)?;
        if !self.key_resolver.verify(proof, &key) {
            return Err(IssuerError::InvalidProof("signature verification failed".into()));
        }

        let nonce = claims
            .nonce
            .as_deref()
            .ok_or_else(|| IssuerError::InvalidProof("missing nonce".into()))?;
        match self.nonces.get(nonce).await {
            Some(bound_token) if bound_token == access_token => {}
            Some(_) => {
                return Err(IssuerError::InvalidProof(
                    "nonce issued for another access token".into(),
                ))
            }
            None => return Err(IssuerError::InvalidProof("unknown or expired nonce".into())),
        }
        if self.nonces.take(nonce).await.is_none() {
            return Err(IssuerError::InvalidProof("nonce already used".into()));
        }

        Ok(ValidatedProof {
            holder_did: did_of(&key_id).to_string(),
            claims,
        })
    }
}

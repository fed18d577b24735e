// src/utils/jwt.rs
//! Compact JWS handling.
//!
//! Only what the issuer needs: splitting a token, reading its header
//! through `jsonwebtoken`, and decoding the payload without verifying it.
//! Signature verification lives with the key resolver.

use crate::error::{IssuerError, Result};
use crate::utils::serialization::{decode_base64url, deserialize, encode_base64url};
use jsonwebtoken::Header;
use serde::de::DeserializeOwned;

/// A compact token split into its three segments.
#[derive(Debug, Clone)]
pub struct CompactToken<'a> {
    pub header: &'a str,
    pub payload: &'a str,
    pub signature: &'a str,
}

impl<'a> CompactToken<'a> {
    /// Splits `header.payload.signature`.
    ///
    /// # Errors
    /// `IssuerError::MalformedToken` if the token does not have exactly three
    /// non-empty header and payload segments.
    pub fn parse(token: &'a str) -> Result<Self> {
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None)
                if !header.is_empty() && !payload.is_empty() =>
            {
                Ok(Self {
                    header,
                    payload,
                    signature,
                })
            }
            _ => Err(IssuerError::MalformedToken(
                "expected three dot-separated segments".into(),
            )),
        }
    }

    /// The bytes covered by the signature.
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        decode_base64url(self.signature)
            .map_err(|e| IssuerError::MalformedToken(format!("signature: {e}")))
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        decode_base64url(self.payload)
            .map_err(|e| IssuerError::MalformedToken(format!("payload: {e}")))
    }
}

/// Reads the JOSE header of a compact token.
pub fn decode_header(token: &str) -> Result<Header> {
    jsonwebtoken::decode_header(token).map_err(|e| IssuerError::MalformedToken(e.to_string()))
}

/// Decodes the payload of a compact token into `T` without verifying it.
pub fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T> {
    let compact = CompactToken::parse(token)?;
    deserialize(&compact.payload_bytes()?)
        .map_err(|e| IssuerError::MalformedToken(format!("claims: {e}")))
}

/// Builds an unsigned compact token (`alg: none`) around a JSON payload.
///
/// Used for the subject-bound form of a credential before it is signed.
pub fn unsigned_token(payload: &str) -> String {
    let header = encode_base64url(br#"{"alg":"none","typ":"JWT"}"#);
    format!("{}.{}.", header, encode_base64url(payload.as_bytes()))
}

// src/models/signing.rs
//! Remote signing payloads.
//!
//! [`SignatureRequest`] / [`SignedData`] are the shapes exchanged with the
//! direct backend. The remaining structs mirror the CSC-style token and
//! signDoc exchanges of the delegated backend; their field names are part
//! of that wire protocol and must not change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label attached to the single document digest we authorize.
pub const DOCUMENT_DIGEST_LABEL: &str = "Issued Credential";

/// Signature container requested from the signer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureType {
    Jades,
    Cose,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignatureConfiguration {
    #[serde(rename = "type")]
    pub signature_type: SignatureType,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// A document to be signed; `data` is the serialized credential payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignatureRequest {
    pub configuration: SignatureConfiguration,
    pub data: String,
}

impl SignatureRequest {
    pub fn jades(data: String) -> Self {
        Self {
            configuration: SignatureConfiguration {
                signature_type: SignatureType::Jades,
                parameters: BTreeMap::new(),
            },
            data,
        }
    }
}

/// The signed compact document returned to the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignedData {
    #[serde(rename = "type")]
    pub signature_type: SignatureType,
    pub data: String,
}

/// One digest the delegated grant is scoped to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentDigest {
    pub hash: String,
    pub label: String,
}

/// `authorization_details` entry binding a token to one document digest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthorizationDetails {
    #[serde(rename = "type")]
    pub detail_type: String,
    #[serde(rename = "credentialID")]
    pub credential_id: String,
    #[serde(rename = "credentialPassword")]
    pub credential_password: String,
    #[serde(rename = "documentDigests")]
    pub document_digests: Vec<DocumentDigest>,
    #[serde(rename = "hashAlgorithmOID")]
    pub hash_algorithm_oid: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Serialize, Debug, Clone)]
pub struct SignDocDocument {
    pub document: String,
    pub signature_format: String,
    pub conformance_level: String,
    #[serde(rename = "signAlgo")]
    pub sign_algo: String,
    pub signed_envelope_property: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct SignDocRequest {
    #[serde(rename = "credentialID")]
    pub credential_id: String,
    pub documents: Vec<SignDocDocument>,
    #[serde(rename = "hashAlgorithmOID")]
    pub hash_algorithm_oid: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SignDocResponse {
    #[serde(rename = "DocumentWithSignature", default)]
    pub document_with_signature: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CredentialsListRequest {
    #[serde(rename = "credentialInfo")]
    pub credential_info: bool,
    #[serde(rename = "onlyValid")]
    pub only_valid: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CredentialsListResponse {
    #[serde(rename = "credentialIDs", default)]
    pub credential_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorization_details_wire_names() {
        let details = AuthorizationDetails {
            detail_type: "credential".into(),
            credential_id: "cred-1".into(),
            credential_password: "pin".into(),
            document_digests: vec![DocumentDigest {
                hash: "abc=".into(),
                label: DOCUMENT_DIGEST_LABEL.into(),
            }],
            hash_algorithm_oid: "2.16.840.1.101.3.4.2.1".into(),
        };
        assert_eq!(
            serde_json::to_value(vec![details]).unwrap(),
            json!([{
                "type": "credential",
                "credentialID": "cred-1",
                "credentialPassword": "pin",
                "documentDigests": [{"hash": "abc=", "label": "Issued Credential"}],
                "hashAlgorithmOID": "2.16.840.1.101.3.4.2.1"
            }])
        );
    }
}

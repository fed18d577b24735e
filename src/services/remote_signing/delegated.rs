// src/services/remote_signing/delegated.rs
//! CSC-style delegated signing backend.
//!
//! Each document is signed under its own access token: the client-credentials
//! grant carries an `authorization_details` entry naming the SHA-256 digest of
//! exactly that document, so the token cannot be used to sign anything else.
//! All parameters are rebuilt per call from the immutable configuration.

use super::{read_success, SigningBackend};
use crate::config::{SignerConfig, SHA256_OID};
use crate::error::{IssuerError, Result, SignerError};
use crate::models::signing::{
    AuthorizationDetails, CredentialsListRequest, CredentialsListResponse, DocumentDigest,
    SignDocDocument, SignDocRequest, SignDocResponse, SignatureRequest, SignatureType, SignedData,
    TokenResponse, DOCUMENT_DIGEST_LABEL,
};
use crate::utils::crypto::sha256_base64;
use crate::utils::serialization::serialize;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

/// ECDSA with SHA-256.
const SIGN_ALGORITHM_OID: &str = "1.2.840.10045.4.3.2";
/// Scope of tokens not tied to a document.
const SERVICE_SCOPE: &str = "service";

/// Digest algorithms the signer may be asked to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    /// # Errors
    /// `IssuerError::UnsupportedHashAlgorithm` for anything but SHA-256.
    pub fn from_oid(oid: &str) -> Result<Self> {
        match oid {
            SHA256_OID => Ok(HashAlgorithm::Sha256),
            other => Err(IssuerError::UnsupportedHashAlgorithm(other.to_string())),
        }
    }

    pub fn oid(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => SHA256_OID,
        }
    }

    /// Base64 digest of `document`.
    pub fn digest(self, document: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => sha256_base64(document),
        }
    }
}

/// Everything one delegated signing call needs.
#[derive(Debug, Clone)]
struct SigningParams {
    credential_id: String,
    credential_password: String,
    authorization_type: String,
    hash_algorithm: HashAlgorithm,
    digest: String,
}

impl SigningParams {
    fn for_document(config: &SignerConfig, document: &[u8]) -> Result<Self> {
        let hash_algorithm = HashAlgorithm::from_oid(&config.hash_algorithm_oid)?;
        Ok(Self {
            credential_id: config.credential_id.clone(),
            credential_password: config.credential_password.clone(),
            authorization_type: config.authorization_type.clone(),
            hash_algorithm,
            digest: hash_algorithm.digest(document),
        })
    }

    fn authorization_details(&self) -> AuthorizationDetails {
        AuthorizationDetails {
            detail_type: self.authorization_type.clone(),
            credential_id: self.credential_id.clone(),
            credential_password: self.credential_password.clone(),
            document_digests: vec![DocumentDigest {
                hash: self.digest.clone(),
                label: DOCUMENT_DIGEST_LABEL.to_string(),
            }],
            hash_algorithm_oid: self.hash_algorithm.oid().to_string(),
        }
    }
}

pub struct DelegatedSigner {
    client: reqwest::Client,
    config: Arc<SignerConfig>,
}

impl DelegatedSigner {
    /// # Errors
    /// `IssuerError::UnsupportedHashAlgorithm` for a non SHA-256 OID,
    /// `IssuerError::Http` if the HTTP client cannot be built.
    pub fn new(config: Arc<SignerConfig>) -> Result<Self> {
        HashAlgorithm::from_oid(&config.hash_algorithm_oid)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    /// Client-credentials grant, either scoped to one document or service-wide.
    async fn request_token(&self, details: Option<&AuthorizationDetails>) -> Result<String> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        match details {
            Some(details) => form.push((
                "authorization_details",
                serialize(&[details])?,
            )),
            None => form.push(("scope", SERVICE_SCOPE.to_string())),
        }

        let response = self
            .client
            .post(self.config.endpoint(&self.config.token_path))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(SignerError::from)?;

        let body = read_success(response).await?;
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SignerError::MalformedResponse(format!("token response: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SigningBackend for DelegatedSigner {
    fn mode(&self) -> &'static str {
        "delegated"
    }

    async fn sign_document(&self, request: &SignatureRequest, _token: &str) -> Result<SignedData> {
        let document = request.data.as_bytes();
        let params = SigningParams::for_document(&self.config, document)?;
        let access_token = self.request_token(Some(&params.authorization_details())).await?;
        debug!("scoped signing token obtained for digest {}", params.digest);

        let sign_request = SignDocRequest {
            credential_id: params.credential_id.clone(),
            documents: vec![SignDocDocument {
                document: base64::encode(document),
                signature_format: "J".to_string(),
                conformance_level: "Ades-B-B".to_string(),
                sign_algo: SIGN_ALGORITHM_OID.to_string(),
                signed_envelope_property: "Attached".to_string(),
            }],
            hash_algorithm_oid: params.hash_algorithm.oid().to_string(),
        };

        let response = self
            .client
            .post(self.config.endpoint(&self.config.sign_path))
            .bearer_auth(&access_token)
            .json(&sign_request)
            .send()
            .await
            .map_err(SignerError::from)?;

        let body = read_success(response).await?;
        let signed: SignDocResponse = serde_json::from_str(&body)
            .map_err(|e| SignerError::MalformedResponse(format!("signDoc response: {e}")))?;
        let encoded = signed
            .document_with_signature
            .into_iter()
            .next()
            .ok_or_else(|| SignerError::MalformedResponse("no signed document returned".into()))?;

        let bytes = base64::decode(&encoded)
            .or_else(|_| base64::decode_config(&encoded, base64::URL_SAFE_NO_PAD))
            .map_err(|e| SignerError::MalformedResponse(format!("signed document: {e}")))?;
        let data = String::from_utf8(bytes)
            .map_err(|e| SignerError::MalformedResponse(format!("signed document: {e}")))?;

        Ok(SignedData {
            signature_type: SignatureType::Jades,
            data,
        })
    }

    async fn validate_credentials(&self) -> Result<bool> {
        let token = self.request_token(None).await?;
        let response = self
            .client
            .post(self.config.endpoint(&self.config.credentials_list_path))
            .bearer_auth(&token)
            .json(&CredentialsListRequest {
                credential_info: true,
                only_valid: true,
            })
            .send()
            .await
            .map_err(SignerError::from)?;

        let body = read_success(response).await?;
        let list: CredentialsListResponse = serde_json::from_str(&body)
            .map_err(|e| SignerError::MalformedResponse(format!("credentials list: {e}")))?;

        let wanted = self.config.credential_id.trim();
        let present = list
            .credential_ids
            .iter()
            .any(|id| id.trim().eq_ignore_ascii_case(wanted));
        if present {
            info!("signing credential {} is valid at the signer", wanted);
        } else {
            warn!("signing credential {} not among the signer's valid credentials", wanted);
        }
        Ok(present)
    }
}

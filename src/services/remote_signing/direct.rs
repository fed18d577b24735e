// src/services/remote_signing/direct.rs
//! Direct signing backend.
//!
//! Forwards the signature request verbatim to an internal signing endpoint,
//! passing the caller's bearer token through. No token exchange happens.

use super::{read_success, SigningBackend};
use crate::config::SignerConfig;
use crate::error::{IssuerError, Result, SignerError};
use crate::models::signing::{SignatureRequest, SignedData};
use async_trait::async_trait;
use log::info;

pub struct DirectSigner {
    client: reqwest::Client,
    sign_url: String,
}

impl DirectSigner {
    /// # Errors
    /// `IssuerError::Http` if the HTTP client cannot be built.
    pub fn new(config: &SignerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            sign_url: config.direct_url.clone(),
        })
    }
}

#[async_trait]
impl SigningBackend for DirectSigner {
    fn mode(&self) -> &'static str {
        "direct"
    }

    async fn sign_document(&self, request: &SignatureRequest, token: &str) -> Result<SignedData> {
        let response = self
            .client
            .post(&self.sign_url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(SignerError::from)?;

        let body = read_success(response).await?;
        serde_json::from_str(&body)
            .map_err(|e| IssuerError::Signer(SignerError::MalformedResponse(e.to_string())))
    }

    async fn validate_credentials(&self) -> Result<bool> {
        info!("direct signer has no credential list; nothing to validate");
        Ok(true)
    }
}

// src/services/notification.rs
//! Outbound notifications and push delivery.
//!
//! Both are best-effort from the issuance flow's point of view: callers log
//! failures and carry on. Email rendering and transport live outside the
//! core; [`LoggingNotifier`] stands in for them.

use crate::error::{IssuerError, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tells the designated approver that signing fell back to async mode.
    async fn notify_signing_fallback(
        &self,
        signer_email: &str,
        procedure_id: &str,
        manual_completion_url: &str,
    ) -> Result<()>;

    async fn notify_credential_ready(&self, email: &str, name: &str) -> Result<()>;

    async fn notify_credential_offer(
        &self,
        email: &str,
        offer_url: &str,
        wallet_url: &str,
        name: &str,
        organization: &str,
    ) -> Result<()>;

    /// Push delivery to the holder's `response_uri` failed.
    async fn notify_delivery_failure(
        &self,
        email: &str,
        procedure_id: &str,
        response_uri: &str,
    ) -> Result<()>;
}

/// Notifier that only writes log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_signing_fallback(
        &self,
        signer_email: &str,
        procedure_id: &str,
        manual_completion_url: &str,
    ) -> Result<()> {
        info!(
            "notify {}: procedure {} awaits manual signature at {}",
            signer_email, procedure_id, manual_completion_url
        );
        Ok(())
    }

    async fn notify_credential_ready(&self, email: &str, name: &str) -> Result<()> {
        info!("notify {}: credential for {} is ready", email, name);
        Ok(())
    }

    async fn notify_credential_offer(
        &self,
        email: &str,
        offer_url: &str,
        wallet_url: &str,
        name: &str,
        organization: &str,
    ) -> Result<()> {
        info!(
            "notify {}: offer for {} ({}) at {} via {}",
            email, name, organization, offer_url, wallet_url
        );
        Ok(())
    }

    async fn notify_delivery_failure(
        &self,
        email: &str,
        procedure_id: &str,
        response_uri: &str,
    ) -> Result<()> {
        warn!(
            "notify {}: delivery of procedure {} to {} failed",
            email, procedure_id, response_uri
        );
        Ok(())
    }
}

/// PATCH-style push of a signed credential to a holder callback.
#[derive(Clone)]
pub struct ResponseUriDelivery {
    client: reqwest::Client,
}

impl ResponseUriDelivery {
    /// # Errors
    /// `IssuerError::Http` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Sends `{"credential": ...}` to `uri` with a bearer token.
    ///
    /// # Errors
    /// `IssuerError::Delivery` on network failure or a non-2xx answer.
    pub async fn deliver(&self, uri: &str, encoded_credential: &str, bearer_token: &str) -> Result<()> {
        let response = self
            .client
            .patch(uri)
            .bearer_auth(bearer_token)
            .json(&json!({ "credential": encoded_credential }))
            .send()
            .await
            .map_err(|e| IssuerError::Delivery {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(IssuerError::Delivery {
                uri: uri.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_patches_with_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/callback")
            .match_header("authorization", "Bearer tok")
            .match_body(mockito::Matcher::Json(json!({"credential": "vc"})))
            .with_status(204)
            .create_async()
            .await;

        let delivery = ResponseUriDelivery::new(Duration::from_secs(5)).unwrap();
        delivery
            .deliver(&format!("{}/callback", server.url()), "vc", "tok")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_non_2xx_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/callback")
            .with_status(500)
            .create_async()
            .await;

        let delivery = ResponseUriDelivery::new(Duration::from_secs(5)).unwrap();
        let result = delivery
            .deliver(&format!("{}/callback", server.url()), "vc", "tok")
            .await;
        assert!(matches!(result, Err(IssuerError::Delivery { .. })));
    }
}

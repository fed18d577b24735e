// src/services/remote_signing/mod.rs
//! Remote signing orchestration.
//!
//! The orchestrator submits a credential payload to one of two signing
//! backends, retries transient failures with jittered exponential backoff and
//! checks that the signed document carries exactly the submitted payload.
//! When the retry budget runs out the procedure is parked in
//! `PEND_SIGNATURE`, switched to async mode and the approver is notified;
//! the caller still receives a [`IssuerError::SigningFailed`].
//!
//! Per attempt: `ATTEMPT -> SUCCESS | TRANSIENT -> retry | HARD -> fail`,
//! and a transient failure on the last attempt becomes the async fallback.

pub mod delegated;
pub mod direct;
pub mod retry;

use crate::config::{RetryPolicy, SignerBackend, SignerConfig};
use crate::error::{IssuerError, Result, SignerError};
use crate::models::signing::{SignatureRequest, SignedData};
use crate::services::deferred_issuance::DeferredIssuanceCoordinator;
use crate::services::notification::Notifier;
use crate::services::procedure_service::CredentialProcedureService;
use crate::utils::jwt::decode_claims;
use async_trait::async_trait;
use backon::Retryable;
use delegated::DelegatedSigner;
use direct::DirectSigner;
use log::{error, info, warn};
use retry::JitteredBackoffBuilder;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One way of getting a document signed.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Short name recorded as the procedure's signature mode.
    fn mode(&self) -> &'static str;

    /// Performs a single signing exchange. No retries happen here.
    ///
    /// # Arguments
    /// * `request` - Document and signature configuration
    /// * `token` - Caller's bearer token; backends that mint their own ignore it
    async fn sign_document(&self, request: &SignatureRequest, token: &str) -> Result<SignedData>;

    /// Checks that the configured signing credential is usable.
    async fn validate_credentials(&self) -> Result<bool>;
}

/// Builds the backend selected in the configuration.
///
/// # Errors
/// Propagates backend construction failures (HTTP client, hash algorithm).
pub fn build_backend(config: Arc<SignerConfig>) -> Result<Arc<dyn SigningBackend>> {
    let backend: Arc<dyn SigningBackend> = match config.backend {
        SignerBackend::Direct => Arc::new(DirectSigner::new(&config)?),
        SignerBackend::Delegated => Arc::new(DelegatedSigner::new(config)?),
    };
    info!("remote signing backend: {}", backend.mode());
    Ok(backend)
}

/// Returns the body of a 2xx response, or classifies the failure.
pub(crate) async fn read_success(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await.map_err(SignerError::from)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(SignerError::from_status(status.as_u16(), body).into())
    }
}

#[derive(Clone)]
pub struct RemoteSigningOrchestrator {
    backend: Arc<dyn SigningBackend>,
    retry: RetryPolicy,
    procedures: Arc<CredentialProcedureService>,
    deferred: Arc<DeferredIssuanceCoordinator>,
    notifier: Arc<dyn Notifier>,
    public_base_url: String,
    default_approver_email: String,
}

impl RemoteSigningOrchestrator {
    pub fn new(
        backend: Arc<dyn SigningBackend>,
        retry: RetryPolicy,
        procedures: Arc<CredentialProcedureService>,
        deferred: Arc<DeferredIssuanceCoordinator>,
        notifier: Arc<dyn Notifier>,
        public_base_url: String,
        default_approver_email: String,
    ) -> Self {
        Self {
            backend,
            retry,
            procedures,
            deferred,
            notifier,
            public_base_url,
            default_approver_email,
        }
    }

    /// Short name of the active backend.
    pub fn mode(&self) -> &'static str {
        self.backend.mode()
    }

    /// Signs a procedure's `Issued` credential and settles persisted state.
    ///
    /// The exchange and the settlement run on their own task, so a caller
    /// that goes away neither cuts the signer off nor loses its result. On
    /// success the signed credential is recorded, the procedure becomes
    /// `Valid` and its deferred record is deleted. On fallback the procedure
    /// is parked and a deferred transaction id is minted.
    ///
    /// # Arguments
    /// * `request` - Document to sign
    /// * `token` - Bearer token forwarded to the direct backend
    /// * `procedure_id` - Procedure the document belongs to
    ///
    /// # Errors
    /// * `IssuerError::SigningFailed` when transient failures exhausted the
    ///   retry budget and the procedure was switched to async mode
    /// * `IssuerError::PayloadMismatch` when the signed payload differs
    /// * `IssuerError::Signer` for any other signer failure
    pub async fn sign(
        &self,
        request: SignatureRequest,
        token: String,
        procedure_id: String,
    ) -> Result<SignedData> {
        let this = self.clone();
        tokio::spawn(async move { this.sign_and_settle(&request, &token, &procedure_id).await })
            .await
            .map_err(|e| IssuerError::Internal(format!("signing task failed: {e}")))?
    }

    /// Signs with retries and the integrity check, without touching any
    /// procedure state.
    pub async fn sign_with_retry(&self, request: &SignatureRequest, token: &str) -> Result<SignedData> {
        let signed = (|| async { self.backend.sign_document(request, token).await })
            .retry(JitteredBackoffBuilder::new(self.retry))
            .when(|err: &IssuerError| matches!(err, IssuerError::Signer(e) if e.is_retryable()))
            .notify(|err: &IssuerError, delay: Duration| {
                warn!("signing attempt failed ({}), retrying in {:?}", err, delay);
            })
            .await?;

        ensure_payload_matches(request, &signed)?;
        Ok(signed)
    }

    /// Health check of the signing credential.
    pub async fn validate_credentials(&self) -> Result<bool> {
        self.backend.validate_credentials().await
    }

    async fn sign_and_settle(
        &self,
        request: &SignatureRequest,
        token: &str,
        procedure_id: &str,
    ) -> Result<SignedData> {
        match self.sign_with_retry(request, token).await {
            Ok(signed) => {
                info!("procedure {} signed by {} backend", procedure_id, self.mode());
                self.procedures
                    .record_signature(procedure_id, signed.data.clone(), self.mode())
                    .await?;
                self.procedures
                    .confirm_delivery(procedure_id, signed.data.clone())
                    .await?;
                self.deferred.complete(procedure_id).await;
                Ok(signed)
            }
            Err(IssuerError::Signer(source)) if source.is_retryable() => {
                self.fall_back_to_async(procedure_id).await;
                let transaction_id = self.deferred.issue_transaction_id(procedure_id).await?;
                Err(IssuerError::SigningFailed {
                    procedure_id: procedure_id.to_string(),
                    source,
                    switched_to_async: true,
                    transaction_id,
                })
            }
            Err(err) => {
                error!("signing failed for procedure {}: {}", procedure_id, err);
                Err(err)
            }
        }
    }

    async fn fall_back_to_async(&self, procedure_id: &str) {
        warn!(
            "retries exhausted for procedure {}, switching to async signing",
            procedure_id
        );

        let signer_email = match self.procedures.mark_pending_signature(procedure_id).await {
            Ok(procedure) => procedure.signer_email,
            Err(e) => {
                error!("could not park procedure {}: {}", procedure_id, e);
                None
            }
        };
        self.deferred.force_async(procedure_id).await;

        let recipient = signer_email.unwrap_or_else(|| self.default_approver_email.clone());
        let url = self.manual_completion_url(procedure_id);
        if let Err(e) = self
            .notifier
            .notify_signing_fallback(&recipient, procedure_id, &url)
            .await
        {
            warn!("fallback notification for {} failed: {}", procedure_id, e);
        }
    }

    fn manual_completion_url(&self, procedure_id: &str) -> String {
        format!(
            "{}/issuer/v1/procedures/{}/sign",
            self.public_base_url.trim_end_matches('/'),
            procedure_id
        )
    }
}

/// The signed token's payload must equal the submitted JSON payload.
fn ensure_payload_matches(request: &SignatureRequest, signed: &SignedData) -> Result<()> {
    let submitted: Value = serde_json::from_str(&request.data)?;
    let embedded: Value = decode_claims(&signed.data).map_err(|e| {
        IssuerError::Signer(SignerError::MalformedResponse(format!("signed document: {e}")))
    })?;
    if submitted != embedded {
        return Err(IssuerError::PayloadMismatch);
    }
    Ok(())
}

// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Drives one credential from offer to delivery by composing the core
//! components:
//! - procedure store and deferred coordinator for state and one-time codes
//! - proof validator for holder proof of possession
//! - response builder and signing orchestrator for the credential itself
//! - notifier and response-URI push for the holder and approver
//!
//! Notification and push failures are logged and never fail a flow.

use crate::config::IssuerConfig;
use crate::error::{IssuerError, Result};
use crate::models::credential_procedure::{CredentialProcedure, CredentialStatus, OperationMode};
use crate::models::signing::SignatureRequest;
use crate::models::token::AccessTokenClaims;
use crate::services::deferred_issuance::{DeferredIssuanceCoordinator, PollOutcome};
use crate::services::notification::{Notifier, ResponseUriDelivery};
use crate::services::procedure_service::{CreateProcedure, CredentialProcedureService};
use crate::services::proof_validator::ProofValidator;
use crate::services::remote_signing::RemoteSigningOrchestrator;
use crate::services::response_builder::{CredentialResponse, IssuanceResponseBuilder};
use crate::utils::crypto::random_token;
use crate::utils::jwt::decode_claims;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

/// What the issuer hands out when an issuance starts.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IssuanceOffer {
    pub procedure_id: String,
    /// Short-lived alias safe to show on untrusted channels
    pub c_transaction_code: String,
    pub expires_in: u64,
    pub offer_url: String,
}

/// Result of redeeming an offer alias.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OfferGrant {
    pub procedure_id: String,
    /// Pre-authorized code for the authorization server's token endpoint
    pub pre_authorized_code: String,
}

pub struct CredentialIssuer {
    procedures: Arc<CredentialProcedureService>,
    deferred: Arc<DeferredIssuanceCoordinator>,
    proofs: Arc<ProofValidator>,
    orchestrator: Arc<RemoteSigningOrchestrator>,
    responses: IssuanceResponseBuilder,
    notifier: Arc<dyn Notifier>,
    delivery: ResponseUriDelivery,
    public_base_url: String,
    wallet_url: String,
}

impl CredentialIssuer {
    /// Creates a new CredentialIssuer
    ///
    /// # Arguments
    /// * `config` - Issuer identity and public links
    /// * `procedures` - Procedure store
    /// * `deferred` - Deferred transaction coordinator
    /// * `proofs` - Proof-of-possession validator
    /// * `orchestrator` - Remote signing orchestrator
    /// * `notifier` - Best-effort notification channel
    /// * `delivery` - Push delivery to holder callbacks
    pub fn new(
        config: &IssuerConfig,
        procedures: Arc<CredentialProcedureService>,
        deferred: Arc<DeferredIssuanceCoordinator>,
        proofs: Arc<ProofValidator>,
        orchestrator: Arc<RemoteSigningOrchestrator>,
        notifier: Arc<dyn Notifier>,
        delivery: ResponseUriDelivery,
    ) -> Self {
        let responses = IssuanceResponseBuilder::new(
            procedures.clone(),
            deferred.clone(),
            orchestrator.clone(),
            config.issuer_did.clone(),
            config.credential_validity_days,
        );
        Self {
            procedures,
            deferred,
            proofs,
            orchestrator,
            responses,
            notifier,
            delivery,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            wallet_url: config.wallet_url.clone(),
        }
    }

    /// Creates a draft procedure with its transaction and offers it.
    ///
    /// # Arguments
    /// * `request` - Credential document and procedure metadata
    /// * `response_uri` - Optional holder callback for push delivery
    ///
    /// # Returns
    /// The offer with its short-lived alias and link
    pub async fn start_issuance(
        &self,
        request: CreateProcedure,
        response_uri: Option<String>,
    ) -> Result<IssuanceOffer> {
        let procedure = self.procedures.create_procedure(request).await?;
        let transaction_code = self
            .deferred
            .create_transaction(&procedure.procedure_id, procedure.operation_mode, response_uri)
            .await;
        let alias = self
            .deferred
            .exchange_short_lived_alias(&transaction_code)
            .await?;

        let offer = IssuanceOffer {
            procedure_id: procedure.procedure_id.clone(),
            offer_url: self.offer_url(&alias.c_transaction_code),
            c_transaction_code: alias.c_transaction_code,
            expires_in: alias.expires_in,
        };
        self.send_offer(&procedure, &offer.offer_url).await;
        Ok(offer)
    }

    /// Re-sends an offer: the old transaction code stops working and a new
    /// alias is minted for the new one.
    pub async fn reissue_offer(&self, procedure_id: &str) -> Result<IssuanceOffer> {
        let procedure = self.procedures.get(procedure_id).await?;
        if procedure.status() != CredentialStatus::Draft {
            return Err(IssuerError::CredentialAlreadyIssued);
        }
        // The old offer dies with its code; the procedure stays Draft for the new one.
        let transaction_code = self.deferred.rotate_transaction_code(procedure_id).await?;
        let alias = self
            .deferred
            .exchange_short_lived_alias(&transaction_code)
            .await?;

        let offer = IssuanceOffer {
            procedure_id: procedure_id.to_string(),
            offer_url: self.offer_url(&alias.c_transaction_code),
            c_transaction_code: alias.c_transaction_code,
            expires_in: alias.expires_in,
        };
        self.send_offer(&procedure, &offer.offer_url).await;
        Ok(offer)
    }

    /// Redeems an offer alias, consuming its transaction code, and issues the
    /// pre-authorized code the wallet takes to the authorization server.
    ///
    /// # Errors
    /// * `AliasNotFound` for an unknown, expired or already used alias
    /// * `CredentialAlreadyIssued` if the transaction code was consumed
    pub async fn redeem_offer(&self, c_transaction_code: &str) -> Result<OfferGrant> {
        let transaction_code = self
            .deferred
            .redeem_short_lived_alias(c_transaction_code)
            .await?;
        let procedure_id = self
            .deferred
            .resolve_procedure_by_transaction_code(&transaction_code)
            .await?;
        self.deferred
            .consume_transaction_code(&transaction_code)
            .await?;

        let pre_authorized_code = random_token();
        self.deferred
            .attach_pre_authorized_code(&transaction_code, &pre_authorized_code)
            .await?;
        info!("offer redeemed for procedure {}", procedure_id);
        Ok(OfferGrant {
            procedure_id,
            pre_authorized_code,
        })
    }

    /// Correlates an access token minted for a pre-authorized code.
    pub async fn bind_access_token(&self, access_token: &str, pre_authorized_code: &str) -> Result<()> {
        let claims: AccessTokenClaims = decode_claims(access_token)?;
        self.deferred
            .bind_access_token(&claims.jti, pre_authorized_code)
            .await
    }

    /// Mints a `c_nonce` for proofs presented with `access_token`.
    pub async fn issue_nonce(&self, access_token: &str) -> (String, u64) {
        self.proofs.issue_nonce(access_token).await
    }

    /// Handles a credential request.
    ///
    /// # Process Flow
    /// 1. Validates the proof of possession, consuming its nonce
    /// 2. Resolves the procedure through the access token's `jti`
    /// 3. Delegates to the response builder
    pub async fn request_credential(&self, access_token: &str, proof: &str) -> Result<CredentialResponse> {
        let proof = self.proofs.validate(proof, access_token).await?;
        let claims: AccessTokenClaims = decode_claims(access_token)?;
        let procedure_id = self
            .deferred
            .resolve_procedure_by_auth_server_nonce(&claims.jti)
            .await?;
        self.responses
            .build_response(&procedure_id, &proof.holder_did, access_token)
            .await
    }

    /// Polls a deferred transaction. A ready credential completes the
    /// procedure and ends the transaction.
    pub async fn poll_deferred(&self, transaction_id: &str) -> Result<CredentialResponse> {
        match self.deferred.poll_for_credential(transaction_id).await? {
            PollOutcome::Pending { transaction_id } => Ok(CredentialResponse::Deferred {
                transaction_id,
                credential: None,
            }),
            PollOutcome::Ready {
                procedure_id,
                credential,
                format,
            } => {
                let procedure = self
                    .procedures
                    .confirm_delivery(&procedure_id, credential.clone())
                    .await?;
                self.deferred.complete(&procedure_id).await;
                Ok(CredentialResponse::Immediate {
                    credential,
                    format: format.unwrap_or(procedure.credential_format),
                })
            }
        }
    }

    /// Signs a procedure parked for async signing (the target of the
    /// manual-completion link).
    ///
    /// The signed credential is attached to the deferred record for the
    /// next poll and pushed to the holder's `response_uri` when one is set.
    ///
    /// # Errors
    /// * `InvalidStateTransition` unless the procedure waits for a signature
    /// * any signer error, including exhausted retries
    pub async fn complete_pending_signature(&self, procedure_id: &str, token: &str) -> Result<()> {
        let procedure = self.procedures.get(procedure_id).await?;
        if !awaits_signature(&procedure) {
            return Err(IssuerError::InvalidStateTransition {
                from: procedure.status(),
                to: CredentialStatus::PendDownload,
            });
        }

        let payload = self.responses.credential_payload(&procedure)?;
        let signed = self
            .orchestrator
            .sign_with_retry(&SignatureRequest::jades(payload), token)
            .await?;

        let record = self
            .deferred
            .attach_signed_credential(
                procedure_id,
                signed.data.clone(),
                Some(procedure.credential_format.clone()),
            )
            .await?;
        self.procedures
            .mark_pending_download(procedure_id, self.orchestrator.mode())
            .await?;
        info!("procedure {} signed, waiting for download", procedure_id);

        if let Some(uri) = record.response_uri.as_deref() {
            self.push(&procedure, uri, &signed.data, token).await;
        }
        if let Some(email) = procedure.holder_email.as_deref() {
            if let Err(e) = self
                .notifier
                .notify_credential_ready(email, &procedure.subject)
                .await
            {
                warn!("ready notification for {} failed: {}", procedure_id, e);
            }
        }
        Ok(())
    }

    /// Withdraws a procedure that was superseded before delivery and ends
    /// its transaction.
    pub async fn withdraw(&self, procedure_id: &str) -> Result<CredentialProcedure> {
        let procedure = self.procedures.withdraw(procedure_id).await?;
        self.deferred.complete(procedure_id).await;
        Ok(procedure)
    }

    /// Whether the configured signing credential is usable.
    pub async fn signer_health(&self) -> Result<bool> {
        self.orchestrator.validate_credentials().await
    }

    fn offer_url(&self, c_transaction_code: &str) -> String {
        format!("{}/issuer/v1/offers/{}", self.public_base_url, c_transaction_code)
    }

    async fn send_offer(&self, procedure: &CredentialProcedure, offer_url: &str) {
        let Some(email) = procedure.holder_email.as_deref() else {
            return;
        };
        if let Err(e) = self
            .notifier
            .notify_credential_offer(
                email,
                offer_url,
                &self.wallet_url,
                &procedure.subject,
                &procedure.organization_identifier,
            )
            .await
        {
            warn!("offer notification for {} failed: {}", procedure.procedure_id, e);
        }
    }

    async fn push(&self, procedure: &CredentialProcedure, uri: &str, credential: &str, token: &str) {
        match self.delivery.deliver(uri, credential, token).await {
            Ok(()) => info!("credential for {} pushed to {}", procedure.procedure_id, uri),
            Err(e) => {
                warn!("{}", e);
                let email = procedure.holder_email.as_deref().unwrap_or_default();
                if let Err(e) = self
                    .notifier
                    .notify_delivery_failure(email, &procedure.procedure_id, uri)
                    .await
                {
                    warn!("delivery failure notification failed: {}", e);
                }
            }
        }
    }
}

fn awaits_signature(procedure: &CredentialProcedure) -> bool {
    match procedure.status() {
        CredentialStatus::PendSignature => true,
        CredentialStatus::Issued => procedure.operation_mode == OperationMode::Async,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::key_resolver::{encode_did_key, KeyResolver};
    use crate::services::proof_validator::PROOF_MEDIA_TYPE;
    use crate::test_support::{create_request, echo_signature, es256_token, test_signing_key, Harness};
    use crate::utils::jwt::unsigned_token;
    use chrono::Utc;
    use p256::ecdsa::{SigningKey, VerifyingKey};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn issuer(h: &Harness) -> CredentialIssuer {
        let config = IssuerConfig {
            public_base_url: "https://issuer.example/".into(),
            ..IssuerConfig::default()
        };
        CredentialIssuer::new(
            &config,
            h.procedures.clone(),
            h.deferred.clone(),
            Arc::new(ProofValidator::new(KeyResolver::new(), h.proof_nonces.clone())),
            h.orchestrator.clone(),
            h.notifier.clone(),
            ResponseUriDelivery::new(Duration::from_secs(2)).unwrap(),
        )
    }

    fn access_token(jti: &str) -> String {
        unsigned_token(&json!({"jti": jti, "sub": "wallet"}).to_string())
    }

    fn proof(key: &SigningKey, nonce: &str) -> String {
        let now = Utc::now().timestamp();
        es256_token(
            key,
            json!({
                "alg": "ES256",
                "typ": PROOF_MEDIA_TYPE,
                "kid": encode_did_key(&VerifyingKey::from(key)),
            }),
            json!({"aud": "https://issuer.example", "iat": now, "exp": now + 300, "nonce": nonce}),
        )
    }

    /// Offer, redemption and token binding; returns the procedure id and token.
    async fn authorize(
        issuer: &CredentialIssuer,
        mode: OperationMode,
        response_uri: Option<String>,
    ) -> (String, String) {
        let offer = issuer
            .start_issuance(create_request(mode), response_uri)
            .await
            .unwrap();
        assert!(offer
            .offer_url
            .starts_with("https://issuer.example/issuer/v1/offers/"));

        let grant = issuer.redeem_offer(&offer.c_transaction_code).await.unwrap();
        assert_eq!(grant.procedure_id, offer.procedure_id);

        let token = access_token(&format!("jti-{}", offer.procedure_id));
        issuer
            .bind_access_token(&token, &grant.pre_authorized_code)
            .await
            .unwrap();
        (offer.procedure_id, token)
    }

    #[tokio::test]
    async fn test_sync_issuance_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sign")
            .with_body_from_request(|request| echo_signature(request.body().unwrap()))
            .create_async()
            .await;
        let h = Harness::new(&server.url());
        let issuer = issuer(&h);
        let (pid, token) = authorize(&issuer, OperationMode::Sync, None).await;
        assert_eq!(h.notifier.offers.lock().await.len(), 1);

        let holder = test_signing_key();
        let (nonce, _) = issuer.issue_nonce(&token).await;
        let response = issuer
            .request_credential(&token, &proof(&holder, &nonce))
            .await
            .unwrap();

        let CredentialResponse::Immediate { credential, .. } = response else {
            panic!("expected an immediate response");
        };
        let claims: Value = decode_claims(&credential).unwrap();
        assert_eq!(claims["sub"], encode_did_key(&VerifyingKey::from(&holder)));
        assert_eq!(
            h.procedures.get(&pid).await.unwrap().status(),
            CredentialStatus::Valid
        );

        // the nonce was consumed and the transaction is over
        assert_err!(issuer.request_credential(&token, &proof(&holder, &nonce)).await);
    }

    #[tokio::test]
    async fn test_async_issuance_completes_through_polling() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sign")
            .with_body_from_request(|request| echo_signature(request.body().unwrap()))
            .create_async()
            .await;
        let callback = server
            .mock("PATCH", "/callback")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let h = Harness::new(&server.url());
        let issuer = issuer(&h);
        let (pid, token) =
            authorize(&issuer, OperationMode::Async, Some(format!("{}/callback", server.url()))).await;

        let holder = test_signing_key();
        let (nonce, _) = issuer.issue_nonce(&token).await;
        let CredentialResponse::Deferred { transaction_id, .. } = issuer
            .request_credential(&token, &proof(&holder, &nonce))
            .await
            .unwrap()
        else {
            panic!("expected a deferred response");
        };

        let CredentialResponse::Deferred {
            transaction_id: rotated,
            ..
        } = issuer.poll_deferred(&transaction_id).await.unwrap()
        else {
            panic!("expected a pending poll");
        };
        assert_ne!(rotated, transaction_id);

        assert_ok!(issuer.complete_pending_signature(&pid, "ops-token").await);
        assert_eq!(
            h.procedures.get(&pid).await.unwrap().status(),
            CredentialStatus::PendDownload
        );
        callback.assert_async().await;
        assert_eq!(h.notifier.ready.lock().await.len(), 1);

        let CredentialResponse::Immediate { credential, format } =
            issuer.poll_deferred(&rotated).await.unwrap()
        else {
            panic!("expected the credential");
        };
        assert_eq!(format, "jwt_vc_json");
        let procedure = h.procedures.get(&pid).await.unwrap();
        assert_eq!(procedure.status(), CredentialStatus::Valid);
        assert_eq!(procedure.credential_encoded(), Some(credential.as_str()));

        assert!(matches!(
            issuer.poll_deferred(&rotated).await,
            Err(IssuerError::TransactionIdNotFound)
        ));
    }

    #[tokio::test]
    async fn test_fallback_then_manual_completion() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sign")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        let h = Harness::new(&server.url());
        let issuer = issuer(&h);
        let (pid, token) = authorize(&issuer, OperationMode::Sync, None).await;

        let (nonce, _) = issuer.issue_nonce(&token).await;
        let response = issuer
            .request_credential(&token, &proof(&test_signing_key(), &nonce))
            .await
            .unwrap();
        let CredentialResponse::Deferred { transaction_id, credential } = response else {
            panic!("expected a degraded response");
        };
        assert!(credential.is_some());
        assert_eq!(h.notifier.fallbacks.lock().await.len(), 1);

        server.reset_async().await;
        server
            .mock("POST", "/sign")
            .with_body_from_request(|request| echo_signature(request.body().unwrap()))
            .create_async()
            .await;

        assert_ok!(issuer.complete_pending_signature(&pid, "ops-token").await);
        assert!(matches!(
            issuer.poll_deferred(&transaction_id).await.unwrap(),
            CredentialResponse::Immediate { .. }
        ));
    }

    #[tokio::test]
    async fn test_offer_alias_is_single_use() {
        let h = Harness::new("http://127.0.0.1:9");
        let issuer = issuer(&h);
        let offer = issuer
            .start_issuance(create_request(OperationMode::Sync), None)
            .await
            .unwrap();

        assert_ok!(issuer.redeem_offer(&offer.c_transaction_code).await);
        assert!(matches!(
            issuer.redeem_offer(&offer.c_transaction_code).await,
            Err(IssuerError::AliasNotFound)
        ));
    }

    #[tokio::test]
    async fn test_reissued_offer_replaces_transaction_code() {
        let h = Harness::new("http://127.0.0.1:9");
        let issuer = issuer(&h);
        let first = issuer
            .start_issuance(create_request(OperationMode::Sync), None)
            .await
            .unwrap();
        let second = issuer.reissue_offer(&first.procedure_id).await.unwrap();
        assert_eq!(
            h.procedures.get(&first.procedure_id).await.unwrap().status(),
            CredentialStatus::Draft
        );

        // the first alias still maps to the rotated-away code
        assert!(matches!(
            issuer.redeem_offer(&first.c_transaction_code).await,
            Err(IssuerError::TransactionCodeNotFound)
        ));
        assert_eq!(
            issuer.redeem_offer(&second.c_transaction_code).await.unwrap().procedure_id,
            first.procedure_id
        );
    }

    #[tokio::test]
    async fn test_complete_rejects_procedure_not_waiting() {
        let h = Harness::new("http://127.0.0.1:9");
        let issuer = issuer(&h);
        let pid = h.draft(OperationMode::Sync).await;
        assert!(matches!(
            issuer.complete_pending_signature(&pid, "ops-token").await,
            Err(IssuerError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_withdraw_ends_transaction() {
        let h = Harness::new("http://127.0.0.1:9");
        let issuer = issuer(&h);
        let pid = h.draft(OperationMode::Sync).await;
        let withdrawn = issuer.withdraw(&pid).await.unwrap();
        assert_eq!(withdrawn.status(), CredentialStatus::Withdrawn);
        assert!(h.deferred.find(&pid).await.is_none());
    }
}

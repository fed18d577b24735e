// src/test_support.rs
//! Shared fixtures for unit tests.

use crate::config::{RetryPolicy, SignerConfig};
use crate::error::Result;
use crate::models::credential_procedure::OperationMode;
use crate::services::deferred_issuance::DeferredIssuanceCoordinator;
use crate::services::notification::Notifier;
use crate::services::procedure_service::{CreateProcedure, CredentialProcedureService};
use crate::services::remote_signing::direct::DirectSigner;
use crate::services::remote_signing::RemoteSigningOrchestrator;
use crate::storage::deferred_repository::InMemoryDeferredRepository;
use crate::storage::nonce_store::InMemoryNonceStore;
use crate::storage::procedure_repository::InMemoryProcedureRepository;
use crate::utils::serialization::encode_base64url;
use async_trait::async_trait;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub fn test_signing_key() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// Signs `header.payload` with ES256 and returns the compact token.
pub fn es256_token(key: &SigningKey, header: Value, payload: Value) -> String {
    let input = format!(
        "{}.{}",
        encode_base64url(header.to_string().as_bytes()),
        encode_base64url(payload.to_string().as_bytes())
    );
    let signature: Signature = key.sign(input.as_bytes());
    format!("{}.{}", input, encode_base64url(&signature.to_bytes()))
}

/// Direct-signer answer that signs whatever payload was submitted.
pub fn echo_signature(request_body: &[u8]) -> Vec<u8> {
    let request: Value = serde_json::from_slice(request_body).unwrap();
    let payload: Value = serde_json::from_str(request["data"].as_str().unwrap()).unwrap();
    let token = es256_token(
        &test_signing_key(),
        json!({"alg": "ES256", "typ": "JWT"}),
        payload,
    );
    json!({"type": "JADES", "data": token}).to_string().into_bytes()
}

pub fn credential_document() -> Value {
    json!({
        "@context": ["https://www.w3.org/ns/credentials/v2"],
        "type": ["VerifiableCredential", "LEARCredentialEmployee"],
        "credentialSubject": {"mandate": {"mandatee": {"first_name": "Jane"}}}
    })
}

pub fn create_request(mode: OperationMode) -> CreateProcedure {
    CreateProcedure {
        organization_identifier: "ORG-1".into(),
        subject: "Jane Doe".into(),
        credential_format: "jwt_vc_json".into(),
        credential_decoded: credential_document(),
        operation_mode: mode,
        signer_email: Some("signer@example.org".into()),
        holder_email: Some("jane@example.org".into()),
        valid_until: None,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        jitter: 0.0,
    }
}

/// Notifier that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fallbacks: Mutex<Vec<(String, String, String)>>,
    pub ready: Mutex<Vec<String>>,
    pub offers: Mutex<Vec<String>>,
    pub delivery_failures: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_signing_fallback(&self, email: &str, procedure_id: &str, url: &str) -> Result<()> {
        self.fallbacks
            .lock()
            .await
            .push((email.into(), procedure_id.into(), url.into()));
        Ok(())
    }

    async fn notify_credential_ready(&self, email: &str, _name: &str) -> Result<()> {
        self.ready.lock().await.push(email.into());
        Ok(())
    }

    async fn notify_credential_offer(
        &self,
        _email: &str,
        offer_url: &str,
        _wallet_url: &str,
        _name: &str,
        _organization: &str,
    ) -> Result<()> {
        self.offers.lock().await.push(offer_url.into());
        Ok(())
    }

    async fn notify_delivery_failure(&self, _email: &str, procedure_id: &str, _uri: &str) -> Result<()> {
        self.delivery_failures.lock().await.push(procedure_id.into());
        Ok(())
    }
}

/// In-memory wiring of the issuance core against a direct signer URL.
pub struct Harness {
    pub procedures: Arc<CredentialProcedureService>,
    pub deferred: Arc<DeferredIssuanceCoordinator>,
    pub proof_nonces: Arc<InMemoryNonceStore>,
    pub orchestrator: Arc<RemoteSigningOrchestrator>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(signer_url: &str) -> Self {
        let config = SignerConfig {
            direct_url: format!("{}/sign", signer_url.trim_end_matches('/')),
            request_timeout_secs: 2,
            ..SignerConfig::default()
        };
        let procedures = Arc::new(CredentialProcedureService::new(Arc::new(
            InMemoryProcedureRepository::new(),
        )));
        let deferred = Arc::new(DeferredIssuanceCoordinator::new(
            Arc::new(InMemoryDeferredRepository::new()),
            Arc::new(InMemoryNonceStore::new("codes", Duration::from_secs(60))),
            Arc::new(InMemoryNonceStore::new("aliases", Duration::from_secs(60))),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = Arc::new(RemoteSigningOrchestrator::new(
            Arc::new(DirectSigner::new(&config).unwrap()),
            fast_retry(),
            procedures.clone(),
            deferred.clone(),
            notifier.clone(),
            "https://issuer.example/".into(),
            "approver@example.org".into(),
        ));
        Self {
            procedures,
            deferred,
            proof_nonces: Arc::new(InMemoryNonceStore::new("nonces", Duration::from_secs(60))),
            orchestrator,
            notifier,
        }
    }

    /// Creates a draft procedure plus its transaction; returns the procedure id.
    pub async fn draft(&self, mode: OperationMode) -> String {
        let procedure = self
            .procedures
            .create_procedure(create_request(mode))
            .await
            .unwrap();
        self.deferred
            .create_transaction(&procedure.procedure_id, mode, None)
            .await;
        procedure.procedure_id
    }
}

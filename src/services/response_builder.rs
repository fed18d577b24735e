// src/services/response_builder.rs
//! Credential response composition.
//!
//! Binds the holder DID into the procedure's credential, moves the procedure
//! to `ISSUED` with the unsigned bound form, then either hands out a deferred
//! polling handle (async mode) or signs inline (sync mode). Inline signing
//! settles the procedure on the orchestrator's task, so the result is kept
//! even when the caller goes away. A sync signing attempt that ends in
//! [`IssuerError::SigningFailed`] degrades to a deferred response carrying
//! the unsigned credential; every other error propagates.

use crate::error::{IssuerError, Result};
use crate::models::credential_procedure::{CredentialProcedure, OperationMode};
use crate::models::signing::SignatureRequest;
use crate::services::deferred_issuance::DeferredIssuanceCoordinator;
use crate::services::procedure_service::CredentialProcedureService;
use crate::services::remote_signing::RemoteSigningOrchestrator;
use crate::utils::jwt::unsigned_token;
use chrono::{Duration, Utc};
use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Answer to a credential request.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CredentialResponse {
    /// The signed credential.
    Immediate { credential: String, format: String },
    /// Poll the deferred endpoint with `transaction_id`. After a signing
    /// fallback the unsigned bound credential travels along.
    Deferred {
        transaction_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
}

pub struct IssuanceResponseBuilder {
    procedures: Arc<CredentialProcedureService>,
    deferred: Arc<DeferredIssuanceCoordinator>,
    orchestrator: Arc<RemoteSigningOrchestrator>,
    issuer_did: String,
    validity_days: i64,
}

impl IssuanceResponseBuilder {
    pub fn new(
        procedures: Arc<CredentialProcedureService>,
        deferred: Arc<DeferredIssuanceCoordinator>,
        orchestrator: Arc<RemoteSigningOrchestrator>,
        issuer_did: String,
        validity_days: i64,
    ) -> Self {
        Self {
            procedures,
            deferred,
            orchestrator,
            issuer_did,
            validity_days,
        }
    }

    /// Builds the response for a validated credential request.
    ///
    /// # Arguments
    /// * `procedure_id` - Procedure the access token resolved to
    /// * `holder_did` - DID proven by the holder's proof of possession
    /// * `access_token` - Caller's token, forwarded to the direct signer
    ///
    /// # Errors
    /// * `IssuerError::InvalidStateTransition` if the procedure is not `Draft`
    /// * `IssuerError::InvalidRequest` if the document cannot take a subject
    /// * any signer error other than `SigningFailed`
    pub async fn build_response(
        &self,
        procedure_id: &str,
        holder_did: &str,
        access_token: &str,
    ) -> Result<CredentialResponse> {
        let procedure = self.procedures.get(procedure_id).await?;
        let bound = bind_subject(procedure.credential_decoded.clone(), holder_did)?;
        let procedure = self.procedures.update_decoded(procedure_id, bound).await?;
        let payload = self.credential_payload(&procedure)?;

        let unsigned = unsigned_token(&payload);
        self.procedures.issue(procedure_id, unsigned.clone()).await?;

        if procedure.operation_mode == OperationMode::Async {
            let transaction_id = self.deferred.issue_transaction_id(procedure_id).await?;
            info!("procedure {} deferred (async mode)", procedure_id);
            return Ok(CredentialResponse::Deferred {
                transaction_id,
                credential: None,
            });
        }

        let signed = self
            .orchestrator
            .sign(
                SignatureRequest::jades(payload),
                access_token.to_string(),
                procedure_id.to_string(),
            )
            .await;

        match signed {
            Ok(signed) => Ok(CredentialResponse::Immediate {
                credential: signed.data,
                format: procedure.credential_format,
            }),
            Err(IssuerError::SigningFailed {
                source,
                transaction_id,
                ..
            }) => {
                warn!(
                    "procedure {} degraded to deferred delivery: {}",
                    procedure_id, source
                );
                Ok(CredentialResponse::Deferred {
                    transaction_id,
                    credential: Some(unsigned),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// JSON payload submitted for signature, for a procedure whose document
    /// already carries the holder DID in `credentialSubject.id`.
    ///
    /// # Errors
    /// `IssuerError::InvalidRequest` if the subject has not been bound.
    pub fn credential_payload(&self, procedure: &CredentialProcedure) -> Result<String> {
        let holder_did = procedure
            .credential_decoded
            .pointer("/credentialSubject/id")
            .and_then(Value::as_str)
            .ok_or_else(|| IssuerError::InvalidRequest("credential subject is not bound".into()))?;

        let now = Utc::now();
        let expires_at = procedure
            .valid_until
            .unwrap_or_else(|| now + Duration::days(self.validity_days));
        Ok(json!({
            "iss": self.issuer_did,
            "sub": holder_did,
            "jti": procedure.credential_id,
            "nbf": now.timestamp(),
            "iat": now.timestamp(),
            "exp": expires_at.timestamp(),
            "vc": procedure.credential_decoded,
        })
        .to_string())
    }
}

/// Sets `credentialSubject.id` to the holder DID.
fn bind_subject(mut document: Value, holder_did: &str) -> Result<Value> {
    let root = document
        .as_object_mut()
        .ok_or_else(|| IssuerError::InvalidRequest("credential is not a JSON object".into()))?;
    let subject = root
        .entry("credentialSubject")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| IssuerError::InvalidRequest("credentialSubject is not an object".into()))?;
    subject.insert("id".to_string(), Value::String(holder_did.to_string()));
    Ok(document)
}

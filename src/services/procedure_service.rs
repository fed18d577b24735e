// src/services/procedure_service.rs
//! Credential procedure store.
//!
//! Loads a procedure, applies one lifecycle transition from
//! [`CredentialProcedure`] and persists the result. Queries by procedure id,
//! credential id and organization live here too.

use crate::error::{IssuerError, Result};
use crate::models::credential_procedure::{
    CredentialProcedure, CredentialStatus, OperationMode,
};
use crate::storage::procedure_repository::CredentialProcedureRepository;
use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Input for a new procedure.
#[derive(Deserialize, Debug, Clone)]
pub struct CreateProcedure {
    pub organization_identifier: String,
    pub subject: String,
    pub credential_format: String,
    pub credential_decoded: Value,
    #[serde(default)]
    pub operation_mode: OperationMode,
    #[serde(default)]
    pub signer_email: Option<String>,
    #[serde(default)]
    pub holder_email: Option<String>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

pub struct CredentialProcedureService {
    repository: Arc<dyn CredentialProcedureRepository>,
}

impl CredentialProcedureService {
    pub fn new(repository: Arc<dyn CredentialProcedureRepository>) -> Self {
        Self { repository }
    }

    /// Creates and persists a `Draft` procedure.
    ///
    /// # Errors
    /// `IssuerError::CredentialTypeMissing` if the document has no specific type.
    pub async fn create_procedure(&self, request: CreateProcedure) -> Result<CredentialProcedure> {
        let mut procedure = CredentialProcedure::new_draft(
            Uuid::new_v4().to_string(),
            request.organization_identifier,
            request.subject,
            request.credential_format,
            request.credential_decoded,
            request.operation_mode,
        )?;
        procedure.signer_email = request.signer_email;
        procedure.holder_email = request.holder_email;
        procedure.valid_until = request.valid_until;

        self.repository.save(procedure.clone()).await;
        info!(
            "procedure {} created for {} ({})",
            procedure.procedure_id, procedure.organization_identifier, procedure.credential_type
        );
        Ok(procedure)
    }

    pub async fn get(&self, procedure_id: &str) -> Result<CredentialProcedure> {
        self.repository
            .find_by_id(procedure_id)
            .await
            .ok_or_else(|| IssuerError::ProcedureNotFound(procedure_id.to_string()))
    }

    pub async fn get_by_credential_id(&self, credential_id: &str) -> Result<CredentialProcedure> {
        self.repository
            .find_by_credential_id(credential_id)
            .await
            .ok_or_else(|| IssuerError::ProcedureNotFound(credential_id.to_string()))
    }

    pub async fn list_by_organization(
        &self,
        organization_identifier: &str,
        status: Option<CredentialStatus>,
    ) -> Vec<CredentialProcedure> {
        self.repository
            .find_by_organization(organization_identifier, status)
            .await
    }

    /// Credential type of the procedure's current decoded document.
    pub async fn credential_type(&self, procedure_id: &str) -> Result<String> {
        let procedure = self.get(procedure_id).await?;
        crate::models::credential_procedure::extract_credential_type(&procedure.credential_decoded)
    }

    pub async fn update_decoded(&self, procedure_id: &str, document: Value) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, |p| p.update_decoded(document)).await
    }

    pub async fn issue(&self, procedure_id: &str, encoded: String) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, |p| p.issue(encoded)).await
    }

    pub async fn record_signature(
        &self,
        procedure_id: &str,
        encoded: String,
        signature_mode: &str,
    ) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, |p| p.record_signature(encoded, signature_mode))
            .await
    }

    pub async fn confirm_delivery(&self, procedure_id: &str, encoded: String) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, |p| p.confirm_delivery(encoded)).await
    }

    pub async fn withdraw(&self, procedure_id: &str) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, CredentialProcedure::withdraw).await
    }

    pub async fn mark_pending_signature(&self, procedure_id: &str) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, CredentialProcedure::mark_pending_signature)
            .await
    }

    pub async fn mark_pending_download(
        &self,
        procedure_id: &str,
        signature_mode: &str,
    ) -> Result<CredentialProcedure> {
        self.mutate(procedure_id, |p| p.mark_pending_download(signature_mode))
            .await
    }

    async fn mutate<F>(&self, procedure_id: &str, apply: F) -> Result<CredentialProcedure>
    where
        F: FnOnce(&mut CredentialProcedure) -> Result<()> + Send,
    {
        let mut from = None;
        let seen = &mut from;
        let procedure = self
            .repository
            .update(
                procedure_id,
                Box::new(move |p| {
                    *seen = Some(p.status());
                    apply(p)
                }),
            )
            .await?;
        if let Some(from) = from.filter(|f| *f != procedure.status()) {
            info!(
                "procedure {}: {:?} -> {:?}",
                procedure_id,
                from,
                procedure.status()
            );
        }
        Ok(procedure)
    }
}

// src/storage/procedure_repository.rs
//! Persistence contract for credential procedures.
//!
//! The storage technology is not part of the core; `InMemoryProcedureRepository`
//! serves the binary and the tests.

use crate::error::{IssuerError, Result};
use crate::models::credential_procedure::{CredentialProcedure, CredentialStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Fallible in-place change applied to one procedure.
pub type ProcedureUpdate<'a> = Box<dyn FnOnce(&mut CredentialProcedure) -> Result<()> + Send + 'a>;

#[async_trait]
pub trait CredentialProcedureRepository: Send + Sync {
    /// Inserts or replaces the record with the same `procedure_id`.
    async fn save(&self, procedure: CredentialProcedure);

    /// Applies `apply` as one atomic step. The stored procedure only changes
    /// when `apply` succeeds.
    ///
    /// # Errors
    /// `IssuerError::ProcedureNotFound` for an unknown id, or whatever
    /// `apply` returns.
    async fn update(
        &self,
        procedure_id: &str,
        apply: ProcedureUpdate<'_>,
    ) -> Result<CredentialProcedure>;

    async fn find_by_id(&self, procedure_id: &str) -> Option<CredentialProcedure>;

    async fn find_by_credential_id(&self, credential_id: &str) -> Option<CredentialProcedure>;

    /// Procedures of an organization, optionally narrowed to one status.
    async fn find_by_organization(
        &self,
        organization_identifier: &str,
        status: Option<CredentialStatus>,
    ) -> Vec<CredentialProcedure>;
}

/// HashMap-backed repository keyed by procedure id.
#[derive(Default)]
pub struct InMemoryProcedureRepository {
    procedures: RwLock<HashMap<String, CredentialProcedure>>,
}

impl InMemoryProcedureRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialProcedureRepository for InMemoryProcedureRepository {
    async fn save(&self, procedure: CredentialProcedure) {
        self.procedures
            .write()
            .await
            .insert(procedure.procedure_id.clone(), procedure);
    }

    async fn update(
        &self,
        procedure_id: &str,
        apply: ProcedureUpdate<'_>,
    ) -> Result<CredentialProcedure> {
        let mut procedures = self.procedures.write().await;
        let stored = procedures
            .get_mut(procedure_id)
            .ok_or_else(|| IssuerError::ProcedureNotFound(procedure_id.to_string()))?;
        let mut updated = stored.clone();
        apply(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn find_by_id(&self, procedure_id: &str) -> Option<CredentialProcedure> {
        self.procedures.read().await.get(procedure_id).cloned()
    }

    async fn find_by_credential_id(&self, credential_id: &str) -> Option<CredentialProcedure> {
        self.procedures
            .read()
            .await
            .values()
            .find(|p| p.credential_id == credential_id)
            .cloned()
    }

    async fn find_by_organization(
        &self,
        organization_identifier: &str,
        status: Option<CredentialStatus>,
    ) -> Vec<CredentialProcedure> {
        let mut found: Vec<CredentialProcedure> = self
            .procedures
            .read()
            .await
            .values()
            .filter(|p| p.organization_identifier == organization_identifier)
            .filter(|p| status.map_or(true, |s| p.status() == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        found
    }
}

// src/storage/deferred_repository.rs
//! Persistence contract for deferred issuance metadata.
//!
//! Deleting a record that is already gone is a no-op: a signing success and
//! a concurrent async fallback may both try to settle the same procedure.
//! Changes to an existing record go through [`DeferredMetadataRepository::update`],
//! which never brings a deleted record back.

use crate::models::deferred_metadata::DeferredCredentialMetadata;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-place change applied to one deferred record.
pub type DeferredUpdate<'a> = Box<dyn FnOnce(&mut DeferredCredentialMetadata) + Send + 'a>;

#[async_trait]
pub trait DeferredMetadataRepository: Send + Sync {
    /// Inserts or replaces the record of `metadata.procedure_id`.
    async fn save(&self, metadata: DeferredCredentialMetadata);

    /// Applies `apply` to the procedure's record as one atomic step.
    ///
    /// # Returns
    /// The record as stored afterwards, or `None` if there is no record.
    async fn update(
        &self,
        procedure_id: &str,
        apply: DeferredUpdate<'_>,
    ) -> Option<DeferredCredentialMetadata>;

    async fn find_by_procedure_id(&self, procedure_id: &str) -> Option<DeferredCredentialMetadata>;

    async fn find_by_transaction_code(&self, code: &str) -> Option<DeferredCredentialMetadata>;

    async fn find_by_auth_server_nonce(&self, nonce: &str) -> Option<DeferredCredentialMetadata>;

    async fn find_by_transaction_id(&self, transaction_id: &str)
        -> Option<DeferredCredentialMetadata>;

    /// Returns whether a record was removed.
    async fn delete_by_procedure_id(&self, procedure_id: &str) -> bool;
}

#[derive(Default)]
pub struct InMemoryDeferredRepository {
    records: RwLock<HashMap<String, DeferredCredentialMetadata>>,
}

impl InMemoryDeferredRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_by<F>(&self, predicate: F) -> Option<DeferredCredentialMetadata>
    where
        F: Fn(&DeferredCredentialMetadata) -> bool + Send,
    {
        self.records
            .read()
            .await
            .values()
            .find(|record| predicate(record))
            .cloned()
    }
}

#[async_trait]
impl DeferredMetadataRepository for InMemoryDeferredRepository {
    async fn save(&self, metadata: DeferredCredentialMetadata) {
        self.records
            .write()
            .await
            .insert(metadata.procedure_id.clone(), metadata);
    }

    async fn update(
        &self,
        procedure_id: &str,
        apply: DeferredUpdate<'_>,
    ) -> Option<DeferredCredentialMetadata> {
        let mut records = self.records.write().await;
        let record = records.get_mut(procedure_id)?;
        apply(record);
        Some(record.clone())
    }

    async fn find_by_procedure_id(&self, procedure_id: &str) -> Option<DeferredCredentialMetadata> {
        self.records.read().await.get(procedure_id).cloned()
    }

    async fn find_by_transaction_code(&self, code: &str) -> Option<DeferredCredentialMetadata> {
        self.find_by(|r| r.transaction_code == code).await
    }

    async fn find_by_auth_server_nonce(&self, nonce: &str) -> Option<DeferredCredentialMetadata> {
        self.find_by(|r| r.auth_server_nonce.as_deref() == Some(nonce))
            .await
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Option<DeferredCredentialMetadata> {
        self.find_by(|r| r.transaction_id.as_deref() == Some(transaction_id))
            .await
    }

    async fn delete_by_procedure_id(&self, procedure_id: &str) -> bool {
        self.records.write().await.remove(procedure_id).is_some()
    }
}

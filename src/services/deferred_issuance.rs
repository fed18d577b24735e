// src/services/deferred_issuance.rs
//! Deferred issuance coordination.
//!
//! Owns the codes that tie an issuance transaction together:
//! - the transaction code (long-lived, single use, bound to one procedure)
//! - the short-lived alias shown on untrusted channels
//! - the authorization-server nonce correlating an access token
//! - the polling handle, rotated on every unsuccessful poll
//!
//! Code validity lives in the nonce stores; the deferred record only keeps
//! the current value of each code. A code that is absent from its store but
//! still named by a record has been consumed (or has lapsed), which reads as
//! "already issued". A code no record names was never valid or has been
//! rotated away, which reads as "not found".

use crate::error::{IssuerError, Result};
use crate::models::credential_procedure::OperationMode;
use crate::models::deferred_metadata::DeferredCredentialMetadata;
use crate::storage::deferred_repository::DeferredMetadataRepository;
use crate::storage::nonce_store::NonceStore;
use crate::utils::crypto::random_token;
use log::{debug, info};
use std::sync::Arc;

/// Result of one deferred poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The signed credential is ready; the caller finalizes the procedure.
    Ready {
        procedure_id: String,
        credential: String,
        format: Option<String>,
    },
    /// Not ready yet; poll again with this fresh handle.
    Pending { transaction_id: String },
}

/// A short-lived alias and its lifetime in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAlias {
    pub c_transaction_code: String,
    pub expires_in: u64,
}

pub struct DeferredIssuanceCoordinator {
    repository: Arc<dyn DeferredMetadataRepository>,
    transaction_codes: Arc<dyn NonceStore>,
    aliases: Arc<dyn NonceStore>,
}

impl DeferredIssuanceCoordinator {
    pub fn new(
        repository: Arc<dyn DeferredMetadataRepository>,
        transaction_codes: Arc<dyn NonceStore>,
        aliases: Arc<dyn NonceStore>,
    ) -> Self {
        Self {
            repository,
            transaction_codes,
            aliases,
        }
    }

    /// Mints a transaction code and persists a new deferred record for the
    /// procedure. Every call mints a new code.
    pub async fn create_transaction(
        &self,
        procedure_id: &str,
        operation_mode: OperationMode,
        response_uri: Option<String>,
    ) -> String {
        let code = self.mint_transaction_code().await;
        self.repository
            .save(DeferredCredentialMetadata::new(
                procedure_id.to_string(),
                code.clone(),
                operation_mode,
                response_uri,
            ))
            .await;
        info!("transaction created for procedure {}", procedure_id);
        code
    }

    /// Records the authorization server's pre-authorized code as the
    /// record's initial auth-server nonce.
    pub async fn attach_pre_authorized_code(
        &self,
        transaction_code: &str,
        pre_auth_code: &str,
    ) -> Result<()> {
        let record = self
            .repository
            .find_by_transaction_code(transaction_code)
            .await
            .ok_or(IssuerError::TransactionCodeNotFound)?;
        let pre_auth_code = pre_auth_code.to_string();
        self.repository
            .update(
                &record.procedure_id,
                Box::new(move |r| r.auth_server_nonce = Some(pre_auth_code)),
            )
            .await
            .ok_or(IssuerError::TransactionCodeNotFound)?;
        Ok(())
    }

    /// Rebinds the record holding `pre_auth_code` to the access token's `jti`.
    pub async fn bind_access_token(&self, auth_server_nonce: &str, pre_auth_code: &str) -> Result<()> {
        let record = self
            .repository
            .find_by_auth_server_nonce(pre_auth_code)
            .await
            .ok_or(IssuerError::TransactionCodeNotFound)?;
        let expected = pre_auth_code.to_string();
        let bound = auth_server_nonce.to_string();
        let updated = self
            .repository
            .update(
                &record.procedure_id,
                Box::new(move |r| {
                    if r.auth_server_nonce.as_deref() == Some(expected.as_str()) {
                        r.auth_server_nonce = Some(bound);
                    }
                }),
            )
            .await;
        match updated {
            Some(r) if r.auth_server_nonce.as_deref() == Some(auth_server_nonce) => {
                debug!("access token bound to procedure {}", r.procedure_id);
                Ok(())
            }
            _ => Err(IssuerError::TransactionCodeNotFound),
        }
    }

    /// Resolves the procedure an access token was bound to.
    pub async fn resolve_procedure_by_auth_server_nonce(&self, auth_server_nonce: &str) -> Result<String> {
        self.repository
            .find_by_auth_server_nonce(auth_server_nonce)
            .await
            .map(|record| record.procedure_id)
            .ok_or(IssuerError::CredentialAlreadyIssued)
    }

    /// Replaces the procedure's transaction code; the old code stops
    /// resolving immediately.
    pub async fn rotate_transaction_code(&self, procedure_id: &str) -> Result<String> {
        let code = self.mint_transaction_code().await;
        let mut previous = None;
        let replaced = &mut previous;
        let next = code.clone();
        let updated = self
            .repository
            .update(
                procedure_id,
                Box::new(move |r| {
                    *replaced = Some(std::mem::replace(&mut r.transaction_code, next));
                }),
            )
            .await;
        if updated.is_none() {
            self.transaction_codes.delete(&code).await;
            return Err(IssuerError::ProcedureNotFound(procedure_id.to_string()));
        }
        if let Some(previous) = previous {
            self.transaction_codes.delete(&previous).await;
        }
        info!("transaction code rotated for procedure {}", procedure_id);
        Ok(code)
    }

    /// Mints a short-lived alias for a live transaction code.
    pub async fn exchange_short_lived_alias(&self, transaction_code: &str) -> Result<CodeAlias> {
        if self.transaction_codes.get(transaction_code).await.is_none() {
            return Err(IssuerError::TransactionCodeNotFound);
        }
        let c_transaction_code = self.aliases.add("", transaction_code).await;
        Ok(CodeAlias {
            c_transaction_code,
            expires_in: self.aliases.expiry_seconds(),
        })
    }

    /// Exchanges an alias for its transaction code. Single use.
    pub async fn redeem_short_lived_alias(&self, c_transaction_code: &str) -> Result<String> {
        self.aliases
            .take(c_transaction_code)
            .await
            .ok_or(IssuerError::AliasNotFound)
    }

    /// Consumes a transaction code. Single use.
    pub async fn consume_transaction_code(&self, transaction_code: &str) -> Result<()> {
        match self.transaction_codes.take(transaction_code).await {
            Some(_) => {
                info!("transaction code consumed");
                Ok(())
            }
            None => Err(self.classify_missing_code(transaction_code).await),
        }
    }

    /// Resolves the procedure a live transaction code is bound to.
    ///
    /// # Errors
    /// - `CredentialAlreadyIssued` if a record still names the code but the
    ///   code itself is no longer live
    /// - `TransactionCodeNotFound` if no record names the code
    pub async fn resolve_procedure_by_transaction_code(&self, transaction_code: &str) -> Result<String> {
        let record = self
            .repository
            .find_by_transaction_code(transaction_code)
            .await
            .ok_or(IssuerError::TransactionCodeNotFound)?;
        if self.transaction_codes.get(transaction_code).await.is_none() {
            return Err(IssuerError::CredentialAlreadyIssued);
        }
        Ok(record.procedure_id)
    }

    /// Assigns a fresh polling handle to the procedure's record.
    pub async fn issue_transaction_id(&self, procedure_id: &str) -> Result<String> {
        let transaction_id = random_token();
        let handle = transaction_id.clone();
        self.repository
            .update(procedure_id, Box::new(move |r| r.transaction_id = Some(handle)))
            .await
            .ok_or_else(|| IssuerError::ProcedureNotFound(procedure_id.to_string()))?;
        Ok(transaction_id)
    }

    /// Returns the ready credential, or rotates the handle and returns the
    /// new one.
    ///
    /// The rotation only applies while the record still carries
    /// `transaction_id` and no credential, so a concurrent attach or a
    /// second poll with the same handle cannot be overwritten.
    pub async fn poll_for_credential(&self, transaction_id: &str) -> Result<PollOutcome> {
        let record = self
            .repository
            .find_by_transaction_id(transaction_id)
            .await
            .ok_or(IssuerError::TransactionIdNotFound)?;

        if let Some(credential) = record.vc.clone() {
            debug!("deferred credential ready for procedure {}", record.procedure_id);
            return Ok(PollOutcome::Ready {
                procedure_id: record.procedure_id,
                credential,
                format: record.vc_format,
            });
        }

        let fresh = random_token();
        let expected = transaction_id.to_string();
        let next = fresh.clone();
        let updated = self
            .repository
            .update(
                &record.procedure_id,
                Box::new(move |r| {
                    if r.vc.is_none() && r.transaction_id.as_deref() == Some(expected.as_str()) {
                        r.transaction_id = Some(next);
                    }
                }),
            )
            .await
            .ok_or(IssuerError::TransactionIdNotFound)?;

        if updated.transaction_id.as_deref() == Some(fresh.as_str()) {
            return Ok(PollOutcome::Pending {
                transaction_id: fresh,
            });
        }
        match updated.vc {
            Some(credential) if updated.transaction_id.as_deref() == Some(transaction_id) => {
                Ok(PollOutcome::Ready {
                    procedure_id: updated.procedure_id,
                    credential,
                    format: updated.vc_format,
                })
            }
            _ => Err(IssuerError::TransactionIdNotFound),
        }
    }

    /// Forces the record into async mode. An absent record is a no-op.
    pub async fn force_async(&self, procedure_id: &str) {
        self.repository
            .update(
                procedure_id,
                Box::new(|r| r.operation_mode = OperationMode::Async),
            )
            .await;
    }

    /// Stores the signed credential so the next poll returns it.
    pub async fn attach_signed_credential(
        &self,
        procedure_id: &str,
        credential: String,
        format: Option<String>,
    ) -> Result<DeferredCredentialMetadata> {
        self.repository
            .update(
                procedure_id,
                Box::new(move |r| {
                    r.vc = Some(credential);
                    r.vc_format = format;
                }),
            )
            .await
            .ok_or_else(|| IssuerError::ProcedureNotFound(procedure_id.to_string()))
    }

    /// Operation mode recorded for the procedure's transaction.
    pub async fn operation_mode(&self, procedure_id: &str) -> Result<OperationMode> {
        Ok(self.record_of(procedure_id).await?.operation_mode)
    }

    pub async fn find(&self, procedure_id: &str) -> Option<DeferredCredentialMetadata> {
        self.repository.find_by_procedure_id(procedure_id).await
    }

    /// Deletes the procedure's record; the transaction is over.
    pub async fn complete(&self, procedure_id: &str) {
        if self.repository.delete_by_procedure_id(procedure_id).await {
            info!("deferred transaction completed for procedure {}", procedure_id);
        }
    }

    async fn record_of(&self, procedure_id: &str) -> Result<DeferredCredentialMetadata> {
        self.repository
            .find_by_procedure_id(procedure_id)
            .await
            .ok_or_else(|| IssuerError::ProcedureNotFound(procedure_id.to_string()))
    }

    async fn mint_transaction_code(&self) -> String {
        let code = random_token();
        self.transaction_codes.add(&code, &code).await
    }

    async fn classify_missing_code(&self, transaction_code: &str) -> IssuerError {
        match self.repository.find_by_transaction_code(transaction_code).await {
            Some(_) => IssuerError::CredentialAlreadyIssued,
            None => IssuerError::TransactionCodeNotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::deferred_repository::InMemoryDeferredRepository;
    use crate::storage::nonce_store::InMemoryNonceStore;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn coordinator() -> DeferredIssuanceCoordinator {
        DeferredIssuanceCoordinator::new(
            Arc::new(InMemoryDeferredRepository::new()),
            Arc::new(InMemoryNonceStore::new("codes", Duration::from_secs(3600))),
            Arc::new(InMemoryNonceStore::new("aliases", Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn test_resolve_then_consume_reads_as_already_issued() {
        let coordinator = coordinator();
        let code = coordinator
            .create_transaction("P1", OperationMode::Sync, None)
            .await;

        assert_eq!(
            coordinator.resolve_procedure_by_transaction_code(&code).await.unwrap(),
            "P1"
        );
        assert_ok!(coordinator.consume_transaction_code(&code).await);
        assert!(matches!(
            coordinator.resolve_procedure_by_transaction_code(&code).await,
            Err(IssuerError::CredentialAlreadyIssued)
        ));
        assert!(matches!(
            coordinator.consume_transaction_code(&code).await,
            Err(IssuerError::CredentialAlreadyIssued)
        ));
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_found() {
        let coordinator = coordinator();
        assert!(matches!(
            coordinator.resolve_procedure_by_transaction_code("abc123").await,
            Err(IssuerError::TransactionCodeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_each_create_mints_a_new_code() {
        let coordinator = coordinator();
        let first = coordinator.create_transaction("P1", OperationMode::Sync, None).await;
        let second = coordinator.create_transaction("P2", OperationMode::Sync, None).await;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_code() {
        let coordinator = coordinator();
        let old = coordinator.create_transaction("P1", OperationMode::Sync, None).await;
        let new = coordinator.rotate_transaction_code("P1").await.unwrap();

        assert_ne!(old, new);
        assert!(matches!(
            coordinator.resolve_procedure_by_transaction_code(&old).await,
            Err(IssuerError::TransactionCodeNotFound)
        ));
        assert_eq!(
            coordinator.resolve_procedure_by_transaction_code(&new).await.unwrap(),
            "P1"
        );
    }

    #[tokio::test]
    async fn test_alias_is_single_use() {
        let coordinator = coordinator();
        let code = coordinator.create_transaction("P1", OperationMode::Sync, None).await;
        let alias = coordinator.exchange_short_lived_alias(&code).await.unwrap();
        assert_eq!(alias.expires_in, 60);
        assert_ne!(alias.c_transaction_code, code);

        assert_eq!(
            coordinator
                .redeem_short_lived_alias(&alias.c_transaction_code)
                .await
                .unwrap(),
            code
        );
        assert!(matches!(
            coordinator.redeem_short_lived_alias(&alias.c_transaction_code).await,
            Err(IssuerError::AliasNotFound)
        ));
    }

    #[tokio::test]
    async fn test_alias_requires_live_code() {
        let coordinator = coordinator();
        assert_err!(coordinator.exchange_short_lived_alias("missing").await);
    }

    #[tokio::test]
    async fn test_access_token_binding() {
        let coordinator = coordinator();
        let code = coordinator.create_transaction("P1", OperationMode::Sync, None).await;
        assert_ok!(coordinator.attach_pre_authorized_code(&code, "pre-auth-1").await);
        assert_ok!(coordinator.bind_access_token("jti-1", "pre-auth-1").await);

        assert_eq!(
            coordinator.resolve_procedure_by_auth_server_nonce("jti-1").await.unwrap(),
            "P1"
        );
        assert_err!(coordinator.bind_access_token("jti-2", "pre-auth-1").await);
    }

    #[tokio::test]
    async fn test_poll_rotates_handle_until_ready() {
        let coordinator = coordinator();
        coordinator.create_transaction("P1", OperationMode::Async, None).await;
        let mut handle = coordinator.issue_transaction_id("P1").await.unwrap();

        for _ in 0..3 {
            match coordinator.poll_for_credential(&handle).await.unwrap() {
                PollOutcome::Pending { transaction_id } => {
                    assert_ne!(transaction_id, handle);
                    // the previous handle is dead
                    assert!(matches!(
                        coordinator.poll_for_credential(&handle).await,
                        Err(IssuerError::TransactionIdNotFound)
                    ));
                    handle = transaction_id;
                }
                PollOutcome::Ready { .. } => panic!("nothing was attached yet"),
            }
        }

        coordinator
            .attach_signed_credential("P1", "signed-vc".into(), Some("jwt_vc_json".into()))
            .await
            .unwrap();
        assert_eq!(
            coordinator.poll_for_credential(&handle).await.unwrap(),
            PollOutcome::Ready {
                procedure_id: "P1".into(),
                credential: "signed-vc".into(),
                format: Some("jwt_vc_json".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_force_async_and_complete_tolerate_missing_record() {
        let coordinator = coordinator();
        coordinator.force_async("ghost").await;
        coordinator.complete("ghost").await;

        coordinator.create_transaction("P1", OperationMode::Sync, None).await;
        coordinator.force_async("P1").await;
        assert_eq!(
            coordinator.operation_mode("P1").await.unwrap(),
            OperationMode::Async
        );
        coordinator.complete("P1").await;
        assert!(coordinator.find("P1").await.is_none());
    }

    #[tokio::test]
    async fn test_settled_record_is_not_resurrected() {
        let coordinator = coordinator();
        coordinator.create_transaction("P1", OperationMode::Sync, None).await;
        coordinator.complete("P1").await;

        coordinator.force_async("P1").await;
        assert_err!(coordinator.issue_transaction_id("P1").await);
        assert_err!(
            coordinator
                .attach_signed_credential("P1", "vc".into(), None)
                .await
        );
        assert!(coordinator.find("P1").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_poll_never_overwrites_attached_credential() {
        let coordinator = Arc::new(coordinator());
        coordinator.create_transaction("P1", OperationMode::Async, None).await;
        let handle = coordinator.issue_transaction_id("P1").await.unwrap();

        let polls: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                let handle = handle.clone();
                tokio::spawn(async move { coordinator.poll_for_credential(&handle).await })
            })
            .collect();
        let attach = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .attach_signed_credential("P1", "signed-vc".into(), None)
                    .await
            })
        };

        let mut rotations = 0;
        for poll in polls {
            if let Ok(PollOutcome::Pending { .. }) = poll.await.unwrap() {
                rotations += 1;
            }
        }
        assert_ok!(attach.await.unwrap());
        assert!(rotations <= 1);
        assert_eq!(
            coordinator.find("P1").await.unwrap().vc.as_deref(),
            Some("signed-vc")
        );
    }
}

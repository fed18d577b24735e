// src/models/credential_procedure.rs
//! Credential procedure data model and its lifecycle state machine.
//!
//! A procedure is the issuer-side record of one credential under issuance.
//! Every status change goes through a method on [`CredentialProcedure`] so
//! the encoded/status invariant cannot be broken by callers:
//! `credential_encoded` is present exactly when the status is `Issued` or
//! `Valid`.

use crate::error::{IssuerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type markers that every credential carries and that never identify it.
const GENERIC_TYPES: [&str; 2] = ["VerifiableCredential", "VerifiableAttestation"];

/// Lifecycle status of a credential procedure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialStatus {
    Draft,
    Withdrawn,
    Issued,
    PendSignature,
    PendDownload,
    Valid,
}

impl CredentialStatus {
    /// Terminal statuses reject every further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, CredentialStatus::Valid | CredentialStatus::Withdrawn)
    }

    fn carries_encoded(self) -> bool {
        matches!(self, CredentialStatus::Issued | CredentialStatus::Valid)
    }
}

/// Whether the credential is signed inline or delivered later.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationMode {
    #[default]
    Sync,
    Async,
}

/// One credential under issuance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialProcedure {
    /// Server-generated identifier
    pub procedure_id: String,
    /// Identifier the client can correlate with (`id` of the credential)
    pub credential_id: String,
    pub organization_identifier: String,
    /// Display name of the subject
    pub subject: String,
    pub credential_type: String,
    pub credential_format: String,
    /// Canonical JSON document, mutable while `Draft`
    pub credential_decoded: Value,
    credential_encoded: Option<String>,
    credential_status: CredentialStatus,
    pub operation_mode: OperationMode,
    /// Free text naming the backend that produced the signature
    pub signature_mode: Option<String>,
    /// Designated approver contacted when signing falls back to async mode
    pub signer_email: Option<String>,
    /// Holder contact for offer and ready notifications
    pub holder_email: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialProcedure {
    /// Creates a `Draft` procedure around a decoded credential document.
    ///
    /// The credential type is extracted from the document's `type` array.
    ///
    /// # Errors
    /// Returns `IssuerError::CredentialTypeMissing` if the document carries
    /// only generic type markers.
    pub fn new_draft(
        procedure_id: String,
        organization_identifier: String,
        subject: String,
        credential_format: String,
        credential_decoded: Value,
        operation_mode: OperationMode,
    ) -> Result<Self> {
        let credential_type = extract_credential_type(&credential_decoded)?;
        let credential_id = credential_decoded
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("urn:uuid:{procedure_id}"));

        Ok(Self {
            procedure_id,
            credential_id,
            organization_identifier,
            subject,
            credential_type,
            credential_format,
            credential_decoded,
            credential_encoded: None,
            credential_status: CredentialStatus::Draft,
            operation_mode,
            signature_mode: None,
            signer_email: None,
            holder_email: None,
            valid_until: None,
            updated_at: Utc::now(),
        })
    }

    pub fn status(&self) -> CredentialStatus {
        self.credential_status
    }

    pub fn credential_encoded(&self) -> Option<&str> {
        self.credential_encoded.as_deref()
    }

    /// Replaces the decoded document. Only allowed while `Draft`.
    pub fn update_decoded(&mut self, document: Value) -> Result<()> {
        if self.credential_status != CredentialStatus::Draft {
            return Err(self.illegal(CredentialStatus::Draft));
        }
        self.credential_type = extract_credential_type(&document)?;
        self.credential_decoded = document;
        self.touch();
        Ok(())
    }

    /// `Draft -> Issued`, carrying the bound (or already signed) encoded form.
    pub fn issue(&mut self, encoded: String) -> Result<()> {
        self.transition(&[CredentialStatus::Draft], CredentialStatus::Issued)?;
        self.credential_encoded = Some(encoded);
        Ok(())
    }

    /// Replaces the bound form with the signed one while `Issued`.
    pub fn record_signature(&mut self, encoded: String, signature_mode: &str) -> Result<()> {
        if self.credential_status != CredentialStatus::Issued {
            return Err(self.illegal(CredentialStatus::Issued));
        }
        self.credential_encoded = Some(encoded);
        self.signature_mode = Some(signature_mode.to_string());
        self.touch();
        Ok(())
    }

    /// `Issued | PendDownload -> Valid`. The delivered form becomes the
    /// encoded credential.
    pub fn confirm_delivery(&mut self, encoded: String) -> Result<()> {
        self.transition(
            &[CredentialStatus::Issued, CredentialStatus::PendDownload],
            CredentialStatus::Valid,
        )?;
        self.credential_encoded = Some(encoded);
        Ok(())
    }

    /// `Draft | Issued -> Withdrawn`.
    pub fn withdraw(&mut self) -> Result<()> {
        self.transition(
            &[CredentialStatus::Draft, CredentialStatus::Issued],
            CredentialStatus::Withdrawn,
        )
    }

    /// `Issued -> PendSignature`; the mode becomes `Async` and stays so.
    pub fn mark_pending_signature(&mut self) -> Result<()> {
        self.transition(&[CredentialStatus::Issued], CredentialStatus::PendSignature)?;
        self.operation_mode = OperationMode::Async;
        Ok(())
    }

    /// `Issued | PendSignature -> PendDownload`: the signed credential waits
    /// in the deferred record for the holder to collect it.
    pub fn mark_pending_download(&mut self, signature_mode: &str) -> Result<()> {
        self.transition(
            &[CredentialStatus::Issued, CredentialStatus::PendSignature],
            CredentialStatus::PendDownload,
        )?;
        self.signature_mode = Some(signature_mode.to_string());
        Ok(())
    }

    fn transition(&mut self, from: &[CredentialStatus], to: CredentialStatus) -> Result<()> {
        if self.credential_status.is_terminal() || !from.contains(&self.credential_status) {
            return Err(self.illegal(to));
        }
        self.credential_status = to;
        if !to.carries_encoded() {
            self.credential_encoded = None;
        }
        self.touch();
        Ok(())
    }

    fn illegal(&self, to: CredentialStatus) -> IssuerError {
        IssuerError::InvalidStateTransition {
            from: self.credential_status,
            to,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Returns the first entry of the document's `type` array that is not a
/// generic marker.
///
/// # Errors
/// `IssuerError::CredentialTypeMissing` when `type` is absent or holds
/// only generic markers.
pub fn extract_credential_type(document: &Value) -> Result<String> {
    let types: Vec<&str> = match document.get("type") {
        Some(Value::Array(entries)) => entries.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(single)) => vec![single.as_str()],
        _ => Vec::new(),
    };

    types
        .into_iter()
        .find(|t| !GENERIC_TYPES.contains(t))
        .map(str::to_string)
        .ok_or(IssuerError::CredentialTypeMissing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> CredentialProcedure {
        CredentialProcedure::new_draft(
            "p1".into(),
            "VATES-B12345678".into(),
            "Jane Doe".into(),
            "jwt_vc_json".into(),
            json!({
                "id": "urn:uuid:cred-1",
                "type": ["VerifiableCredential", "LEARCredentialEmployee"],
                "credentialSubject": {"mandate": {}}
            }),
            OperationMode::Sync,
        )
        .unwrap()
    }

    fn assert_invariant(procedure: &CredentialProcedure) {
        let carries = matches!(
            procedure.status(),
            CredentialStatus::Issued | CredentialStatus::Valid
        );
        assert_eq!(procedure.credential_encoded().is_some(), carries);
    }

    #[test]
    fn test_extract_type_skips_generic_markers() {
        let doc = json!({"type": ["VerifiableAttestation", "VerifiableCredential", "LEARCredentialMachine"]});
        assert_eq!(extract_credential_type(&doc).unwrap(), "LEARCredentialMachine");
    }

    #[test]
    fn test_extract_type_only_generic_is_error() {
        let doc = json!({"type": ["VerifiableCredential", "VerifiableAttestation"]});
        assert!(matches!(
            extract_credential_type(&doc),
            Err(IssuerError::CredentialTypeMissing)
        ));
        assert!(extract_credential_type(&json!({})).is_err());
    }

    #[test]
    fn test_new_draft_uses_document_id() {
        let procedure = draft();
        assert_eq!(procedure.credential_id, "urn:uuid:cred-1");
        assert_eq!(procedure.credential_type, "LEARCredentialEmployee");
        assert_eq!(procedure.status(), CredentialStatus::Draft);
        assert_invariant(&procedure);
    }

    #[test]
    fn test_sync_happy_path_keeps_invariant() {
        let mut procedure = draft();
        procedure.issue("unsigned".into()).unwrap();
        assert_invariant(&procedure);
        procedure.record_signature("signed".into(), "direct").unwrap();
        assert_eq!(procedure.credential_encoded(), Some("signed"));
        procedure.confirm_delivery("signed".into()).unwrap();
        assert_eq!(procedure.status(), CredentialStatus::Valid);
        assert_invariant(&procedure);
    }

    #[test]
    fn test_pending_signature_forces_async_and_clears_encoded() {
        let mut procedure = draft();
        procedure.issue("unsigned".into()).unwrap();
        procedure.mark_pending_signature().unwrap();
        assert_eq!(procedure.status(), CredentialStatus::PendSignature);
        assert_eq!(procedure.operation_mode, OperationMode::Async);
        assert_invariant(&procedure);

        procedure.mark_pending_download("delegated").unwrap();
        assert_invariant(&procedure);
        procedure.confirm_delivery("signed".into()).unwrap();
        assert_invariant(&procedure);
    }

    #[test]
    fn test_terminal_states_reject_mutation() {
        let mut procedure = draft();
        procedure.withdraw().unwrap();
        assert!(procedure.status().is_terminal());
        assert!(procedure.issue("x".into()).is_err());
        assert!(procedure.withdraw().is_err());
        assert!(procedure.update_decoded(json!({"type": ["X"]})).is_err());
        assert_invariant(&procedure);
    }

    #[test]
    fn test_pending_signature_requires_issued() {
        let mut procedure = draft();
        let err = procedure.mark_pending_signature().unwrap_err();
        assert!(matches!(
            err,
            IssuerError::InvalidStateTransition {
                from: CredentialStatus::Draft,
                to: CredentialStatus::PendSignature
            }
        ));
    }
}

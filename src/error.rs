// src/error.rs
//! Error taxonomy for the issuance core.
//!
//! Errors fall into five families: input/format problems (never retried),
//! transient signer failures (retried, then escalated to async mode),
//! signer authorization failures, integrity failures and state errors.
//! Callers match on the variants instead of inspecting messages.

use crate::models::credential_procedure::CredentialStatus;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = IssuerError> = std::result::Result<T, E>;

/// Outcome classification of a single exchange with the remote signer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    /// 5xx, 429, connection failure or timeout. The only retryable class.
    #[error("signer unavailable: {0}")]
    Transient(String),

    /// The signer rejected our client credentials (HTTP 401).
    #[error("invalid signer credentials")]
    InvalidCredentials,

    /// Any other 4xx answer.
    #[error("signer rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The signer answered 2xx but the body could not be understood.
    #[error("malformed signer response: {0}")]
    MalformedResponse(String),
}

impl SignerError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignerError::Transient(_))
    }

    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => SignerError::InvalidCredentials,
            429 | 500..=599 => {
                SignerError::Transient(format!("status {status}: {body}"))
            }
            _ => SignerError::Rejected {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for SignerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return SignerError::Transient(format!("request timeout/connect error: {err}"));
        }
        if let Some(status) = err.status() {
            return SignerError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return SignerError::MalformedResponse(err.to_string());
        }
        SignerError::Transient(format!("request failed: {err}"))
    }
}

/// Errors surfaced by the issuance core.
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("invalid key identifier: {0}")]
    InvalidKeyId(String),

    #[error("credential type missing")]
    CredentialTypeMissing,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("transaction code not found")]
    TransactionCodeNotFound,

    #[error("credential already issued")]
    CredentialAlreadyIssued,

    #[error("transaction id not found")]
    TransactionIdNotFound,

    #[error("credential offer alias not found or expired")]
    AliasNotFound,

    #[error("credential procedure not found: {0}")]
    ProcedureNotFound(String),

    #[error("illegal transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: CredentialStatus,
        to: CredentialStatus,
    },

    /// A hard signer failure that is not eligible for async fallback.
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// Signing did not complete synchronously. The procedure is already
    /// parked and `transaction_id` is its deferred polling handle; the
    /// response layer degrades to a deferred response when it sees this
    /// variant.
    #[error("signing failed for procedure {procedure_id}: {source}{}", async_suffix(.switched_to_async))]
    SigningFailed {
        procedure_id: String,
        #[source]
        source: SignerError,
        switched_to_async: bool,
        transaction_id: String,
    },

    /// The signed document does not carry the payload that was submitted.
    #[error("signed payload does not match the submitted payload")]
    PayloadMismatch,

    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("push delivery to {uri} failed: {reason}")]
    Delivery { uri: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

fn async_suffix(switched_to_async: &bool) -> &'static str {
    if *switched_to_async {
        "; switched to async mode"
    } else {
        ""
    }
}

// src/models/deferred_metadata.rs
//! Deferred issuance metadata.
//!
//! One record per in-flight issuance transaction, keyed 1:1 with a
//! credential procedure. The codes it holds rotate over the flow; only the
//! current one is ever stored.

use crate::models::credential_procedure::OperationMode;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeferredCredentialMetadata {
    pub procedure_id: String,
    /// Current single-use code bound to the procedure
    pub transaction_code: String,
    /// Pre-authorized code, later replaced by the access token `jti`
    pub auth_server_nonce: Option<String>,
    /// Current deferred-polling handle
    pub transaction_id: Option<String>,
    pub operation_mode: OperationMode,
    /// Push-delivery callback
    pub response_uri: Option<String>,
    /// Final signed credential once ready
    pub vc: Option<String>,
    pub vc_format: Option<String>,
}

impl DeferredCredentialMetadata {
    pub fn new(
        procedure_id: String,
        transaction_code: String,
        operation_mode: OperationMode,
        response_uri: Option<String>,
    ) -> Self {
        Self {
            procedure_id,
            transaction_code,
            auth_server_nonce: None,
            transaction_id: None,
            operation_mode,
            response_uri,
            vc: None,
            vc_format: None,
        }
    }
}

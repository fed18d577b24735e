// src/services/api_server.rs
//! API Server for the credential issuer
//!
//! Thin REST surface over [`CredentialIssuer`]. Handlers only extract
//! requests and map results; every rule lives in the core.
//!
//! The API is built using Axum and includes endpoints for:
//! - Starting an issuance, re-sending and withdrawing offers
//! - Offer redemption and access-token binding
//! - Nonce, credential and deferred-credential requests
//! - Manual completion of procedures parked for async signing
//! - Signer health
//!
//! Errors are returned as `{"error": ..., "error_description": ...}`.

use crate::error::{IssuerError, SignerError};
use crate::models::credential_procedure::CredentialStatus;
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::procedure_service::CreateProcedure;
use crate::services::response_builder::CredentialResponse;
use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

/// Proof types accepted on the credential endpoint.
const JWT_PROOF_TYPE: &str = "jwt";

// API request and response structures

/// Request payload for starting an issuance
#[derive(Deserialize)]
struct StartIssuanceRequest {
    #[serde(flatten)]
    procedure: CreateProcedure,
    #[serde(default)]
    response_uri: Option<String>,
}

/// Proof of possession inside a credential request
#[derive(Deserialize)]
struct ProofPayload {
    proof_type: String,
    jwt: String,
}

/// Request payload for the credential endpoint
#[derive(Deserialize)]
struct CredentialRequest {
    proof: ProofPayload,
}

/// Request payload for the deferred-credential endpoint
#[derive(Deserialize)]
struct DeferredCredentialRequest {
    transaction_id: String,
}

/// Request payload sent by the authorization server after minting a token
#[derive(Deserialize)]
struct TokenBindingRequest {
    pre_authorized_code: String,
    access_token: String,
}

/// Response for the nonce endpoint
#[derive(Serialize)]
struct NonceResponse {
    c_nonce: String,
    c_nonce_expires_in: u64,
}

/// Error body in the OIDC4VCI style
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    error_description: String,
}

/// Maps core errors onto HTTP answers.
struct ApiError(IssuerError);

impl From<IssuerError> for ApiError {
    fn from(err: IssuerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            IssuerError::InvalidProof(_) | IssuerError::InvalidKeyId(_) => {
                (StatusCode::BAD_REQUEST, "invalid_proof")
            }
            IssuerError::MalformedToken(_) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            IssuerError::InvalidRequest(_) | IssuerError::CredentialTypeMissing => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            IssuerError::TransactionIdNotFound => {
                (StatusCode::BAD_REQUEST, "invalid_transaction_id")
            }
            IssuerError::CredentialAlreadyIssued => {
                (StatusCode::BAD_REQUEST, "credential_already_issued")
            }
            IssuerError::TransactionCodeNotFound
            | IssuerError::AliasNotFound
            | IssuerError::ProcedureNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            IssuerError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, "invalid_state"),
            IssuerError::Signer(SignerError::InvalidCredentials) => {
                (StatusCode::BAD_GATEWAY, "signer_unauthorized")
            }
            IssuerError::Signer(_) | IssuerError::Http(_) => (StatusCode::BAD_GATEWAY, "signer_error"),
            IssuerError::SigningFailed { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "signing_pending")
            }
            IssuerError::PayloadMismatch => (StatusCode::BAD_GATEWAY, "integrity_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("{}", self.0);
        }
        let body = ErrorBody {
            error: code,
            error_description: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Reads the bearer token of a request.
fn bearer_token(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError(IssuerError::MalformedToken("missing bearer token".into())))
}

/// API server state
pub struct ApiServer {
    /// Issuance workflow
    issuer: Arc<CredentialIssuer>,

    /// Upper bound for handling one request
    request_timeout: Duration,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `issuer` - Issuance workflow
    /// * `request_timeout` - Upper bound for handling one request
    pub fn new(issuer: Arc<CredentialIssuer>, request_timeout: Duration) -> Self {
        ApiServer {
            issuer,
            request_timeout,
        }
    }

    /// Builds the router with all routes and middleware
    pub fn router(self: Arc<Self>) -> Router {
        let timeout = self.request_timeout;
        Router::new()
            .route("/issuer/v1/procedures", post(Self::start_issuance_handler))
            .route("/issuer/v1/procedures/:id/offer", post(Self::reissue_offer_handler))
            .route("/issuer/v1/procedures/:id/withdraw", post(Self::withdraw_handler))
            .route("/issuer/v1/procedures/:id/sign", post(Self::complete_signature_handler))
            .route("/issuer/v1/offers/:alias", get(Self::redeem_offer_handler))
            .route("/issuer/v1/token-binding", post(Self::token_binding_handler))
            .route("/issuer/v1/nonce", post(Self::nonce_handler))
            .route("/issuer/v1/credential", post(Self::credential_handler))
            .route("/issuer/v1/deferred-credential", post(Self::deferred_credential_handler))
            .route("/health/signer", get(Self::signer_health_handler))
            .layer(TimeoutLayer::new(timeout))
            .with_state(self)
    }

    /// Serves requests on `listener` until the process stops
    ///
    /// # Errors
    /// Returns the I/O error that stopped the server.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("API server listening on http://{}", addr);
        }
        axum::serve(listener, self.router()).await
    }

    // =====================
    // Procedure Handlers
    // =====================

    /// Starts an issuance
    ///
    /// # Endpoint
    /// POST /issuer/v1/procedures
    ///
    /// # Responses
    /// - 201 Created: offer with short-lived alias and link
    /// - 400 Bad Request: credential document without a specific type
    async fn start_issuance_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<StartIssuanceRequest>,
    ) -> ApiResult<impl IntoResponse> {
        let offer = state
            .issuer
            .start_issuance(payload.procedure, payload.response_uri)
            .await?;
        Ok((StatusCode::CREATED, Json(offer)))
    }

    /// Re-sends the offer of a draft procedure with a fresh code
    ///
    /// # Endpoint
    /// POST /issuer/v1/procedures/:id/offer
    async fn reissue_offer_handler(
        Path(procedure_id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> ApiResult<impl IntoResponse> {
        Ok(Json(state.issuer.reissue_offer(&procedure_id).await?))
    }

    /// Withdraws a procedure before delivery
    ///
    /// # Endpoint
    /// POST /issuer/v1/procedures/:id/withdraw
    async fn withdraw_handler(
        Path(procedure_id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> ApiResult<impl IntoResponse> {
        let procedure = state.issuer.withdraw(&procedure_id).await?;
        Ok(Json(json!({
            "procedure_id": procedure.procedure_id,
            "status": procedure.status(),
        })))
    }

    /// Signs a procedure waiting for async signature (manual completion link)
    ///
    /// # Endpoint
    /// POST /issuer/v1/procedures/:id/sign
    ///
    /// # Responses
    /// - 202 Accepted: credential signed and waiting for download
    /// - 409 Conflict: procedure is not waiting for a signature
    async fn complete_signature_handler(
        Path(procedure_id): Path<String>,
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
    ) -> ApiResult<impl IntoResponse> {
        let token = bearer_token(&headers)?;
        state
            .issuer
            .complete_pending_signature(&procedure_id, &token)
            .await?;
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "procedure_id": procedure_id,
                "status": CredentialStatus::PendDownload,
            })),
        ))
    }

    // =====================
    // Wallet Handlers
    // =====================

    /// Redeems an offer alias
    ///
    /// # Endpoint
    /// GET /issuer/v1/offers/:alias
    ///
    /// # Responses
    /// - 200 OK: pre-authorized code grant
    /// - 404 Not Found: unknown, expired or used alias
    /// - 400 Bad Request: credential already issued
    async fn redeem_offer_handler(
        Path(alias): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> ApiResult<impl IntoResponse> {
        Ok(Json(state.issuer.redeem_offer(&alias).await?))
    }

    /// Binds an access token to the procedure behind a pre-authorized code
    ///
    /// # Endpoint
    /// POST /issuer/v1/token-binding
    async fn token_binding_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<TokenBindingRequest>,
    ) -> ApiResult<impl IntoResponse> {
        state
            .issuer
            .bind_access_token(&payload.access_token, &payload.pre_authorized_code)
            .await?;
        Ok(StatusCode::NO_CONTENT)
    }

    /// Issues a `c_nonce` for the caller's access token
    ///
    /// # Endpoint
    /// POST /issuer/v1/nonce
    async fn nonce_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
    ) -> ApiResult<impl IntoResponse> {
        let token = bearer_token(&headers)?;
        let (c_nonce, c_nonce_expires_in) = state.issuer.issue_nonce(&token).await;
        Ok(Json(NonceResponse {
            c_nonce,
            c_nonce_expires_in,
        }))
    }

    /// Requests the credential
    ///
    /// # Endpoint
    /// POST /issuer/v1/credential
    ///
    /// # Responses
    /// - 200 OK: signed credential
    /// - 202 Accepted: transaction id to poll
    /// - 400 Bad Request: invalid proof
    async fn credential_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        Json(payload): Json<CredentialRequest>,
    ) -> ApiResult<impl IntoResponse> {
        let token = bearer_token(&headers)?;
        if payload.proof.proof_type != JWT_PROOF_TYPE {
            return Err(IssuerError::InvalidProof(format!(
                "unsupported proof type {}",
                payload.proof.proof_type
            ))
            .into());
        }
        let response = state
            .issuer
            .request_credential(&token, &payload.proof.jwt)
            .await?;
        Ok(credential_answer(response))
    }

    /// Polls a deferred transaction
    ///
    /// # Endpoint
    /// POST /issuer/v1/deferred-credential
    async fn deferred_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<DeferredCredentialRequest>,
    ) -> ApiResult<impl IntoResponse> {
        let response = state.issuer.poll_deferred(&payload.transaction_id).await?;
        Ok(credential_answer(response))
    }

    // =====================
    // Operations
    // =====================

    /// Checks the signing credential at the remote signer
    ///
    /// # Endpoint
    /// GET /health/signer
    async fn signer_health_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        match state.issuer.signer_health().await {
            Ok(true) => (StatusCode::OK, Json(json!({"status": "UP"}))),
            Ok(false) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "DOWN", "reason": "signing credential not valid"})),
            ),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "DOWN", "reason": e.to_string()})),
            ),
        }
    }
}

/// Immediate credentials answer 200, deferred ones 202.
fn credential_answer(response: CredentialResponse) -> (StatusCode, Json<CredentialResponse>) {
    let status = match response {
        CredentialResponse::Immediate { .. } => StatusCode::OK,
        CredentialResponse::Deferred { .. } => StatusCode::ACCEPTED,
    };
    (status, Json(response))
}

// src/main.rs

//! # Verifiable Credential Issuer - Main Entry Point
//!
//! Loads the configuration, wires the issuance core together and starts the
//! API server.
//!
//! ## Wiring
//! 1. **Storage**: three nonce stores (transaction codes, aliases, proof
//!    nonces) with janitors, in-memory procedure and deferred repositories
//! 2. **Signing**: backend selected by `signer.backend`, wrapped by the
//!    retrying orchestrator
//! 3. **Services**: proof validator, credential issuer, API server
//!
//! ## Environment
//! Settings come from `config/issuer.toml` and `ISSUER_*` variables, e.g.
//! `ISSUER_SIGNER__BACKEND=delegated`, `ISSUER_SIGNER__CLIENT_ID=...`.
//! `RUST_LOG` overrides the default `info` log filter.

use anyhow::Context;
use env_logger::Env;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use vc_issuer::config::AppConfig;
use vc_issuer::services::api_server::ApiServer;
use vc_issuer::services::credential_issuer::CredentialIssuer;
use vc_issuer::services::deferred_issuance::DeferredIssuanceCoordinator;
use vc_issuer::services::key_resolver::KeyResolver;
use vc_issuer::services::notification::{LoggingNotifier, ResponseUriDelivery};
use vc_issuer::services::procedure_service::CredentialProcedureService;
use vc_issuer::services::proof_validator::ProofValidator;
use vc_issuer::services::remote_signing::{build_backend, RemoteSigningOrchestrator};
use vc_issuer::storage::deferred_repository::InMemoryDeferredRepository;
use vc_issuer::storage::nonce_store::InMemoryNonceStore;
use vc_issuer::storage::procedure_repository::InMemoryProcedureRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let janitor_interval = Duration::from_secs(config.cache.janitor_interval_secs);

    // Nonce stores, each with its own lifetime
    let transaction_codes = Arc::new(InMemoryNonceStore::new(
        "transaction-codes",
        Duration::from_secs(config.cache.transaction_code_ttl_secs),
    ));
    let aliases = Arc::new(InMemoryNonceStore::new(
        "aliases",
        Duration::from_secs(config.cache.alias_ttl_secs),
    ));
    let proof_nonces = Arc::new(InMemoryNonceStore::new(
        "proof-nonces",
        Duration::from_secs(config.cache.nonce_ttl_secs),
    ));
    for store in [&transaction_codes, &aliases, &proof_nonces] {
        store.spawn_janitor(janitor_interval);
    }

    let procedures = Arc::new(CredentialProcedureService::new(Arc::new(
        InMemoryProcedureRepository::new(),
    )));
    let deferred = Arc::new(DeferredIssuanceCoordinator::new(
        Arc::new(InMemoryDeferredRepository::new()),
        transaction_codes,
        aliases,
    ));
    let notifier = Arc::new(LoggingNotifier);

    let signer_config = Arc::new(config.signer.clone());
    let backend = build_backend(signer_config.clone()).context("failed to build signing backend")?;
    let orchestrator = Arc::new(RemoteSigningOrchestrator::new(
        backend,
        signer_config.retry,
        procedures.clone(),
        deferred.clone(),
        notifier.clone(),
        config.issuer.public_base_url.clone(),
        config.issuer.default_approver_email.clone(),
    ));

    match orchestrator.validate_credentials().await {
        Ok(true) => info!("signing credential validated"),
        Ok(false) => warn!("signing credential not found at the signer"),
        Err(e) => warn!("signer health check failed: {}", e),
    }

    let issuer = CredentialIssuer::new(
        &config.issuer,
        procedures,
        deferred,
        Arc::new(ProofValidator::new(KeyResolver::new(), proof_nonces)),
        orchestrator,
        notifier,
        ResponseUriDelivery::new(signer_config.request_timeout())
            .context("failed to build delivery client")?,
    );

    let api_server = Arc::new(ApiServer::new(
        Arc::new(issuer),
        Duration::from_secs(config.server.request_timeout_secs),
    ));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    api_server.serve(listener).await?;
    Ok(())
}

// src/config.rs
//! Application configuration.
//!
//! Values are layered from an optional `config/issuer.toml` file and from
//! environment variables prefixed with `ISSUER` (nested keys use `__`, e.g.
//! `ISSUER_SIGNER__CLIENT_ID`). Everything is immutable once loaded.

use crate::error::{IssuerError, Result};
use serde::Deserialize;
use std::time::Duration;

/// OID of SHA-256, the only digest the signer is asked to bind.
pub const SHA256_OID: &str = "2.16.840.1.101.3.4.2.1";

/// Root configuration object.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub issuer: IssuerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub signer: SignerConfig,
}

/// HTTP surface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Must outlast the signer's worst case, see [`SignerConfig::worst_case_signing`].
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 90,
        }
    }
}

/// Identity of the issuing authority and the links it hands out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// DID placed in the `iss` claim of issued credentials.
    pub issuer_did: String,
    /// Externally reachable base URL, used for offer and manual-completion links.
    pub public_base_url: String,
    /// Wallet landing page included in offer notifications.
    pub wallet_url: String,
    pub credential_validity_days: i64,
    /// Approver notified when a procedure has no designated signer.
    pub default_approver_email: String,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer_did: "did:web:issuer.local".to_string(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            wallet_url: "https://wallet.local".to_string(),
            credential_validity_days: 365,
            default_approver_email: "approver@issuer.local".to_string(),
        }
    }
}

/// TTLs of the three nonce stores.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub transaction_code_ttl_secs: u64,
    pub alias_ttl_secs: u64,
    pub nonce_ttl_secs: u64,
    pub janitor_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            transaction_code_ttl_secs: 72 * 60 * 60,
            alias_ttl_secs: 600,
            nonce_ttl_secs: 600,
            janitor_interval_secs: 60,
        }
    }
}

/// Which signing backend the orchestrator talks to.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
    /// Internal signing endpoint, bearer token passed through.
    #[default]
    Direct,
    /// CSC-style remote signer with digest-scoped OAuth2 authorization.
    Delegated,
}

/// Remote signer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub backend: SignerBackend,
    pub direct_url: String,
    pub base_url: String,
    pub token_path: String,
    pub sign_path: String,
    pub credentials_list_path: String,
    pub client_id: String,
    pub client_secret: String,
    pub credential_id: String,
    pub credential_password: String,
    /// The fixed `type` member of `authorization_details`.
    pub authorization_type: String,
    pub hash_algorithm_oid: String,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            backend: SignerBackend::Direct,
            direct_url: "http://127.0.0.1:8050/api/v1/signature/sign".to_string(),
            base_url: "http://127.0.0.1:8050".to_string(),
            token_path: "/oauth2/token".to_string(),
            sign_path: "/csc/v2/signatures/signDoc".to_string(),
            credentials_list_path: "/csc/v2/credentials/list".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            credential_id: String::new(),
            credential_password: String::new(),
            authorization_type: "credential".to_string(),
            hash_algorithm_oid: SHA256_OID.to_string(),
            request_timeout_secs: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl SignerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Longest a signing attempt can take before it settles: every attempt
    /// times out on both the token and the sign call, and every backoff
    /// delay hits its cap.
    pub fn worst_case_signing(&self) -> Duration {
        let attempts = self.retry.max_attempts;
        let calls = self.request_timeout() * 2 * attempts;
        let delays = Duration::from_millis(self.retry.max_delay_ms) * attempts.saturating_sub(1);
        calls + delays
    }

    /// Joins a configured path onto the signer base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Retry budget for one signing attempt.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative jitter applied to every delay, e.g. 0.5 for ±50%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter: 0.5,
        }
    }
}

impl AppConfig {
    /// Loads `.env`, the optional config file and the environment, then validates.
    ///
    /// # Errors
    /// Returns `IssuerError::Configuration` if a source cannot be parsed or a
    /// value fails validation.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/issuer").required(false))
            .add_source(
                config::Environment::with_prefix("ISSUER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| IssuerError::Configuration(e.to_string()))?;

        let app: AppConfig = settings
            .try_deserialize()
            .map_err(|e| IssuerError::Configuration(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    /// Rejects settings the core cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.signer.hash_algorithm_oid != SHA256_OID {
            return Err(IssuerError::UnsupportedHashAlgorithm(
                self.signer.hash_algorithm_oid.clone(),
            ));
        }
        let retry = &self.signer.retry;
        if retry.max_attempts == 0 {
            return Err(IssuerError::Configuration(
                "signer.retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(IssuerError::Configuration(
                "signer.retry.jitter must be within [0, 1]".into(),
            ));
        }
        let signing = self.signer.worst_case_signing();
        if Duration::from_secs(self.server.request_timeout_secs) <= signing {
            return Err(IssuerError::Configuration(format!(
                "server.request_timeout_secs must exceed the signer worst case of {}s",
                signing.as_secs()
            )));
        }
        if self.signer.backend == SignerBackend::Delegated
            && (self.signer.client_id.is_empty()
                || self.signer.client_secret.is_empty()
                || self.signer.credential_id.is_empty())
        {
            return Err(IssuerError::Configuration(
                "delegated signing requires client_id, client_secret and credential_id".into(),
            ));
        }
        Ok(())
    }
}

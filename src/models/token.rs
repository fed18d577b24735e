// src/models/token.rs
//! Claims read from tokens handed to the issuer.

use serde::{Deserialize, Serialize};

/// Claims of an access token issued by the authorization server.
///
/// The issuer never verifies these tokens itself; it only correlates them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    pub jti: String,
}

/// Claims of a holder's proof-of-possession token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProofClaims {
    #[serde(default)]
    pub iss: Option<String>,
    pub aud: serde_json::Value,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub nonce: Option<String>,
}

// src/services/mod.rs
pub mod api_server;
pub mod credential_issuer;
pub mod deferred_issuance;
pub mod key_resolver;
pub mod notification;
pub mod procedure_service;
pub mod proof_validator;
pub mod remote_signing;
pub mod response_builder;

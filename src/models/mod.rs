// src/models/mod.rs
pub mod credential_procedure;
pub mod deferred_metadata;
pub mod signing;
pub mod token;

// src/storage/mod.rs
pub mod deferred_repository;
pub mod nonce_store;
pub mod procedure_repository;

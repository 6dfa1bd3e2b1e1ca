//! QuoteLinker Lead API Library
//!
//! Intake, validation, persistence and webhook delivery of insurance
//! quote requests, plus the token-protected lead administration surface.
//!
//! # Modules
//!
//! - `api`: HTTP-facing layer (handlers, routes, auth, OpenAPI).
//! - `core`: Domain logic (validation, rate limiting, ingestion).
//! - `integrations`: Outbound delivery and operator alerts.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: `LeadStore` trait and the PostgreSQL implementation.
//! - `memory_store`: In-process `LeadStore` for tests and local runs.
//! - `errors`: Error handling types.
//! - `export`: CSV rendering of lead exports.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod auth;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod delivery;
pub mod errors;
pub mod export;
pub mod handlers;
pub mod ingestion;
pub mod memory_store;
pub mod models;
pub mod notifier;
pub mod openapi;
pub mod rate_limiter;
pub mod routes;
pub mod validation;

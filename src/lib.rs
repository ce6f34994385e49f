//! jarboot-auth - Authentication and authorization for a clustered management service
//!
//! This crate provides the credential store, the role/privilege registry, bearer
//! token issuing, inter-node trust and the per-request authentication gate
//! that fronts the management API.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod models;
pub mod server;
pub mod telemetry;

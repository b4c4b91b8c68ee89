//! ObjectStore library: an S3-compatible object storage engine.
//!
//! This crate provides request authentication (SigV2 and SigV4), object
//! and multipart storage on an embedded transactional key-value store,
//! streaming range reads, and the HTTP layer that exposes them.

pub mod arn;
pub mod auth;
pub mod chunked;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod xml;

use crate::auth::CredentialResolver;
use crate::config::Config;
use crate::storage::ObjectStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Buckets, objects and multipart uploads.
    pub store: ObjectStore,
    /// Verifies the signature on every S3 request.
    pub resolver: CredentialResolver,
}

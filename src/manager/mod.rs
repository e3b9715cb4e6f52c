//! Storage adapters for policies.
//!
//! The [`Manager`] trait is the narrow seam between the decision engine
//! and any persistence backend: six operations, synchronous-looking even
//! when a backend does I/O internally. `find_request_candidates` may
//! return a superset of the truly matching policies but must never omit
//! one; the engine does the precise matching and deduplicates by id.

use crate::policy::{Policy, PolicyError};
use crate::request::Request;

pub mod composite;
pub mod document;
pub mod memory;

pub use composite::CompositeManager;
pub use document::{
    AclDocument, AclManager, CompiledPattern, DocumentManager, DocumentStore, FieldPatterns,
    MemoryDocumentStore, PolicyDocument,
};
pub use memory::MemoryManager;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("policy not found: {0}")]
    NotFound(String),
    #[error("policy already exists: {0}")]
    AlreadyExists(String),
    #[error("operation not supported by this manager")]
    Unsupported,
    #[error("invalid policy: {0}")]
    InvalidPolicy(#[from] PolicyError),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub trait Manager: Send + Sync {
    /// Insert a new policy; fails with [`StorageError::AlreadyExists`] if
    /// the id is taken.
    fn create(&self, policy: Policy) -> Result<(), StorageError>;

    /// Replace the record with the same id. Upsert semantics are
    /// backend-defined; the in-memory manager treats update as upsert.
    fn update(&self, policy: Policy) -> Result<(), StorageError>;

    fn get(&self, id: &str) -> Result<Policy, StorageError>;

    /// Idempotent; deleting an absent id is not an error.
    fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Paged listing with stable, backend-defined ordering.
    fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Policy>, StorageError>;

    /// Policies that could plausibly match the request (superset
    /// contract).
    fn find_request_candidates(&self, request: &Request) -> Result<Vec<Policy>, StorageError>;
}

/// Write-time gate shared by the adapters: a policy must be structurally
/// valid and every pattern must compile before it is stored.
fn check_writable(policy: &Policy) -> Result<(), StorageError> {
    policy.validate()?;
    policy.check_patterns()?;
    Ok(())
}

//! Read-only composition of several policy backends.

use std::sync::Arc;

use super::{Manager, StorageError};
use crate::policy::Policy;
use crate::request::Request;

/// Concatenates the candidate sets of its children. All other operations
/// are rejected: a composite has no single authoritative backend to write
/// to, and the engine deduplicates candidates by id anyway.
pub struct CompositeManager {
    children: Vec<Arc<dyn Manager>>,
}

impl CompositeManager {
    pub fn new(children: Vec<Arc<dyn Manager>>) -> Self {
        Self { children }
    }
}

impl Manager for CompositeManager {
    fn create(&self, _policy: Policy) -> Result<(), StorageError> {
        Err(StorageError::Unsupported)
    }

    fn update(&self, _policy: Policy) -> Result<(), StorageError> {
        Err(StorageError::Unsupported)
    }

    fn get(&self, _id: &str) -> Result<Policy, StorageError> {
        Err(StorageError::Unsupported)
    }

    fn delete(&self, _id: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported)
    }

    fn get_all(&self, _limit: usize, _offset: usize) -> Result<Vec<Policy>, StorageError> {
        Err(StorageError::Unsupported)
    }

    fn find_request_candidates(&self, request: &Request) -> Result<Vec<Policy>, StorageError> {
        let mut candidates = Vec::new();
        for child in &self.children {
            candidates.extend(child.find_request_candidates(request)?);
        }
        Ok(candidates)
    }
}

//! In-memory, non-persistent policy storage.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{check_writable, Manager, StorageError};
use crate::policy::Policy;
use crate::request::Request;

/// A policy registry held in a map behind a multi-reader lock. Reads take
/// the read lock, writes the write lock, so concurrent decisions never
/// observe a torn record.
#[derive(Debug, Default)]
pub struct MemoryManager {
    policies: RwLock<HashMap<String, Policy>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Policy>>, StorageError> {
        self.policies
            .read()
            .map_err(|_| StorageError::Backend("policy registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Policy>>, StorageError> {
        self.policies
            .write()
            .map_err(|_| StorageError::Backend("policy registry lock poisoned".to_string()))
    }
}

impl Manager for MemoryManager {
    fn create(&self, policy: Policy) -> Result<(), StorageError> {
        check_writable(&policy)?;
        let mut policies = self.write()?;
        if policies.contains_key(&policy.id) {
            return Err(StorageError::AlreadyExists(policy.id));
        }
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    fn update(&self, policy: Policy) -> Result<(), StorageError> {
        check_writable(&policy)?;
        let mut policies = self.write()?;
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Policy, StorageError> {
        let policies = self.read()?;
        policies
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut policies = self.write()?;
        policies.remove(id);
        Ok(())
    }

    fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Policy>, StorageError> {
        let policies = self.read()?;
        let mut ids: Vec<&String> = policies.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| policies.get(id).cloned())
            .collect())
    }

    fn find_request_candidates(&self, _request: &Request) -> Result<Vec<Policy>, StorageError> {
        // No index yet: every stored policy is a candidate, which the
        // superset contract permits.
        let policies = self.read()?;
        Ok(policies.values().cloned().collect())
    }
}

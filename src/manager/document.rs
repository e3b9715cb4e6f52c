//! Document-store layout and adapters.
//!
//! A policy is persisted as one row holding both the raw patterns and a
//! precompiled regex alternation per field, so a capable backend can
//! pre-filter candidates server-side before the engine does the precise
//! match. Two row shapes exist: the canonical multi-valued
//! [`PolicyDocument`] and the single-valued [`AclDocument`].
//!
//! [`DocumentStore`] is the narrow persistence seam; real drivers live
//! outside this crate. [`DocumentManager`] keeps a local cache of decoded
//! policies that is refreshed wholesale by [`DocumentManager::load`] or
//! row-by-row through the change-feed entry point
//! [`DocumentManager::apply_change`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{check_writable, Manager, StorageError};
use crate::compiler;
use crate::conditions::Conditions;
use crate::policy::{Acl, Delimiters, Policy, PolicyError};
use crate::request::Request;

/// A pattern alongside its compiled regular-expression form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPattern {
    pub raw: String,
    pub compiled: String,
}

/// A multi-valued pattern field: the raw patterns plus one alternation
/// joining their compiled forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPatterns {
    pub raw: Vec<String>,
    pub compiled: String,
}

fn compile_field(patterns: &[String], delimiters: Delimiters) -> Result<FieldPatterns, PolicyError> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let regex = compiler::compile(pattern, delimiters.start, delimiters.end).map_err(
            |source| PolicyError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            },
        )?;
        compiled.push(regex.as_str().to_string());
    }
    Ok(FieldPatterns {
        raw: patterns.to_vec(),
        compiled: compiled.join("|"),
    })
}

fn compile_single(pattern: &str, delimiters: Delimiters) -> Result<CompiledPattern, PolicyError> {
    let regex = compiler::compile(pattern, delimiters.start, delimiters.end).map_err(|source| {
        PolicyError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        }
    })?;
    Ok(CompiledPattern {
        raw: pattern.to_string(),
        compiled: regex.as_str().to_string(),
    })
}

fn decode_conditions(id: &str, value: Value) -> Result<Conditions, StorageError> {
    if value.is_null() {
        return Ok(Conditions::default());
    }
    serde_json::from_value(value)
        .map_err(|err| StorageError::Backend(format!("decode conditions of policy {id}: {err}")))
}

/// Row form of a [`Policy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub subjects: FieldPatterns,
    pub resources: FieldPatterns,
    pub actions: FieldPatterns,
    pub effect: crate::policy::Effect,
    #[serde(default)]
    pub conditions: Value,
}

impl PolicyDocument {
    pub fn from_policy(policy: &Policy) -> Result<Self, StorageError> {
        let conditions = serde_json::to_value(&policy.conditions)
            .map_err(|err| StorageError::Backend(format!("encode policy {}: {err}", policy.id)))?;
        Ok(Self {
            id: policy.id.clone(),
            description: policy.description.clone(),
            subjects: compile_field(&policy.subjects, policy.delimiters)?,
            resources: compile_field(&policy.resources, policy.delimiters)?,
            actions: compile_field(&policy.actions, policy.delimiters)?,
            effect: policy.effect,
            conditions,
        })
    }

    pub fn into_policy(self) -> Result<Policy, StorageError> {
        let conditions = decode_conditions(&self.id, self.conditions)?;
        Ok(Policy {
            id: self.id,
            description: self.description,
            subjects: self.subjects.raw,
            effect: self.effect,
            resources: self.resources.raw,
            actions: self.actions.raw,
            conditions,
            delimiters: Delimiters::default(),
        })
    }
}

/// Row form of an [`Acl`]. Each field is populated from its own source:
/// the resource column from the ACL's resource, the action column from
/// its action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclDocument {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub subjects: Vec<CompiledPattern>,
    pub resource: CompiledPattern,
    pub action: CompiledPattern,
    pub effect: crate::policy::Effect,
    #[serde(default)]
    pub conditions: Value,
}

impl AclDocument {
    pub fn from_acl(acl: &Acl) -> Result<Self, StorageError> {
        let delimiters = Delimiters::default();
        let conditions = serde_json::to_value(&acl.conditions)
            .map_err(|err| StorageError::Backend(format!("encode policy {}: {err}", acl.id)))?;
        let subjects = acl
            .subjects
            .iter()
            .map(|subject| compile_single(subject, delimiters))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: acl.id.clone(),
            description: acl.description.clone(),
            subjects,
            resource: compile_single(&acl.resource, delimiters)?,
            action: compile_single(&acl.action, delimiters)?,
            effect: acl.effect,
            conditions,
        })
    }

    pub fn into_policy(self) -> Result<Policy, StorageError> {
        let conditions = decode_conditions(&self.id, self.conditions)?;
        Ok(Policy {
            id: self.id,
            description: self.description,
            subjects: self.subjects.into_iter().map(|s| s.raw).collect(),
            effect: self.effect,
            resources: vec![self.resource.raw],
            actions: vec![self.action.raw],
            conditions,
            delimiters: Delimiters::default(),
        })
    }
}

/// Narrow seam over a document backend. Rows travel as plain JSON values
/// so drivers stay out of this crate.
pub trait DocumentStore: Send + Sync {
    fn put(&self, id: &str, row: Value) -> Result<(), StorageError>;
    fn fetch(&self, id: &str) -> Result<Option<Value>, StorageError>;
    fn remove(&self, id: &str) -> Result<(), StorageError>;
    fn scan(&self) -> Result<Vec<Value>, StorageError>;
}

/// Trivial [`DocumentStore`] used as the reference backend in tests and
/// local setups.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    rows: Mutex<HashMap<String, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn put(&self, id: &str, row: Value) -> Result<(), StorageError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::Backend("document store lock poisoned".to_string()))?;
        rows.insert(id.to_string(), row);
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<Value>, StorageError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::Backend("document store lock poisoned".to_string()))?;
        Ok(rows.get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<(), StorageError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::Backend("document store lock poisoned".to_string()))?;
        rows.remove(id);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Value>, StorageError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::Backend("document store lock poisoned".to_string()))?;
        Ok(rows.values().cloned().collect())
    }
}

/// Multi-valued policies over a document backend, served from a local
/// cache so decisions never wait on the store.
pub struct DocumentManager<S> {
    store: S,
    cache: RwLock<HashMap<String, Policy>>,
}

impl<S: DocumentStore> DocumentManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Policy>>, StorageError> {
        self.cache
            .read()
            .map_err(|_| StorageError::Backend("policy cache lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Policy>>, StorageError> {
        self.cache
            .write()
            .map_err(|_| StorageError::Backend("policy cache lock poisoned".to_string()))
    }

    /// Replace the cache with the backend's current contents. Returns the
    /// number of policies loaded.
    pub fn load(&self) -> Result<usize, StorageError> {
        let rows = self.store.scan()?;
        let mut fresh = HashMap::with_capacity(rows.len());
        for row in rows {
            let document: PolicyDocument = serde_json::from_value(row)
                .map_err(|err| StorageError::Backend(format!("decode policy row: {err}")))?;
            let policy = document.into_policy()?;
            fresh.insert(policy.id.clone(), policy);
        }
        let count = fresh.len();
        let mut cache = self.write()?;
        *cache = fresh;
        Ok(count)
    }

    /// Apply one upstream change atomically: `None -> Some` inserts,
    /// `Some -> None` deletes, and an id rename drops the old row. This is
    /// the entry point for backends that stream a change feed.
    pub fn apply_change(
        &self,
        old: Option<PolicyDocument>,
        new: Option<PolicyDocument>,
    ) -> Result<(), StorageError> {
        let mut cache = self.write()?;
        match (old, new) {
            (Some(old), None) => {
                cache.remove(&old.id);
            }
            (old, Some(new)) => {
                if let Some(old) = old {
                    if old.id != new.id {
                        cache.remove(&old.id);
                    }
                }
                let policy = new.into_policy()?;
                cache.insert(policy.id.clone(), policy);
            }
            (None, None) => {}
        }
        Ok(())
    }
}

impl<S: DocumentStore> Manager for DocumentManager<S> {
    fn create(&self, policy: Policy) -> Result<(), StorageError> {
        check_writable(&policy)?;
        let mut cache = self.write()?;
        if cache.contains_key(&policy.id) {
            return Err(StorageError::AlreadyExists(policy.id));
        }
        let row = serde_json::to_value(PolicyDocument::from_policy(&policy)?)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        self.store.put(&policy.id, row)?;
        cache.insert(policy.id.clone(), policy);
        Ok(())
    }

    fn update(&self, policy: Policy) -> Result<(), StorageError> {
        check_writable(&policy)?;
        let mut cache = self.write()?;
        let row = serde_json::to_value(PolicyDocument::from_policy(&policy)?)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        self.store.put(&policy.id, row)?;
        cache.insert(policy.id.clone(), policy);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Policy, StorageError> {
        let cache = self.read()?;
        cache
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut cache = self.write()?;
        self.store.remove(id)?;
        cache.remove(id);
        Ok(())
    }

    fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Policy>, StorageError> {
        let cache = self.read()?;
        let mut ids: Vec<&String> = cache.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| cache.get(id).cloned())
            .collect())
    }

    fn find_request_candidates(&self, _request: &Request) -> Result<Vec<Policy>, StorageError> {
        let cache = self.read()?;
        Ok(cache.values().cloned().collect())
    }
}

/// Single-valued rows queried straight from the backend, narrowed with
/// the stored compiled patterns before the full policy is decoded.
pub struct AclManager<S> {
    store: S,
}

impl<S: DocumentStore> AclManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn decode_row(row: Value) -> Result<AclDocument, StorageError> {
        serde_json::from_value(row)
            .map_err(|err| StorageError::Backend(format!("decode acl row: {err}")))
    }

    fn acl_from_policy(policy: &Policy) -> Acl {
        Acl {
            id: policy.id.clone(),
            description: policy.description.clone(),
            subjects: policy.subjects.clone(),
            effect: policy.effect,
            resource: policy.resources.first().cloned().unwrap_or_default(),
            action: policy.actions.first().cloned().unwrap_or_default(),
            conditions: policy.conditions.clone(),
        }
    }

    fn write_row(&self, policy: &Policy) -> Result<(), StorageError> {
        let document = AclDocument::from_acl(&Self::acl_from_policy(policy))?;
        let row = serde_json::to_value(&document)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        self.store.put(&document.id, row)
    }

    /// Cheap first-stage filter using the stored compiled patterns. A row
    /// that fails to decode or compile is skipped with a warning so one
    /// bad record cannot stall decisions.
    fn row_matches(document: &AclDocument, subject: &str, request: &Request) -> bool {
        let compiled = |pattern: &CompiledPattern| match regex::Regex::new(&pattern.compiled) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::warn!(policy = %document.id, pattern = %pattern.raw, %error,
                    "skipping stored pattern that no longer compiles");
                None
            }
        };
        let subject_hit = document
            .subjects
            .iter()
            .any(|candidate| compiled(candidate).is_some_and(|regex| regex.is_match(subject)));
        subject_hit
            && compiled(&document.resource).is_some_and(|regex| regex.is_match(&request.resource))
            && compiled(&document.action).is_some_and(|regex| regex.is_match(&request.action))
    }
}

impl<S: DocumentStore> Manager for AclManager<S> {
    fn create(&self, policy: Policy) -> Result<(), StorageError> {
        check_writable(&policy)?;
        if self.store.fetch(&policy.id)?.is_some() {
            return Err(StorageError::AlreadyExists(policy.id));
        }
        self.write_row(&policy)
    }

    fn update(&self, policy: Policy) -> Result<(), StorageError> {
        check_writable(&policy)?;
        self.write_row(&policy)
    }

    fn get(&self, id: &str) -> Result<Policy, StorageError> {
        match self.store.fetch(id)? {
            Some(row) => Self::decode_row(row)?.into_policy(),
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.store.remove(id)
    }

    fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Policy>, StorageError> {
        let mut policies = self
            .store
            .scan()?
            .into_iter()
            .map(|row| Self::decode_row(row)?.into_policy())
            .collect::<Result<Vec<_>, _>>()?;
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies.into_iter().skip(offset).take(limit).collect())
    }

    fn find_request_candidates(&self, request: &Request) -> Result<Vec<Policy>, StorageError> {
        let rows = self.store.scan()?;
        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::decode_row(row) {
                Ok(document) => documents.push(document),
                Err(error) => {
                    tracing::warn!(%error, "skipping undecodable policy row");
                }
            }
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for subject in &request.subjects {
            for document in &documents {
                if seen.contains(document.id.as_str()) {
                    continue;
                }
                if Self::row_matches(document, subject, request) {
                    seen.insert(document.id.clone());
                    candidates.push(document.clone().into_policy()?);
                }
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Effect;

    fn policy(id: &str) -> Policy {
        Policy {
            id: id.to_string(),
            description: "doc".to_string(),
            subjects: vec!["user:<.+>".to_string()],
            effect: Effect::Allow,
            resources: vec!["articles:<[0-9]+>".to_string(), "drafts:<[0-9]+>".to_string()],
            actions: vec!["create".to_string()],
            conditions: Conditions::default(),
            delimiters: Delimiters::default(),
        }
    }

    #[test]
    fn policy_document_round_trip() {
        let policy = policy("fuac.articles");
        let document = PolicyDocument::from_policy(&policy).unwrap();
        assert_eq!(document.subjects.raw, policy.subjects);
        assert_eq!(
            document.resources.compiled,
            "^articles:([0-9]+)$|^drafts:([0-9]+)$"
        );
        let back = document.into_policy().unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn acl_document_populates_fields_from_their_own_sources() {
        let acl = Acl {
            id: "fuac.one".to_string(),
            description: String::new(),
            subjects: vec!["user:alice".to_string()],
            effect: Effect::Allow,
            resource: "articles:1".to_string(),
            action: "update".to_string(),
            conditions: Conditions::default(),
        };
        let document = AclDocument::from_acl(&acl).unwrap();
        assert_eq!(document.resource.raw, "articles:1");
        assert_eq!(document.action.raw, "update");
        assert_eq!(document.subjects[0].raw, "user:alice");

        let back = document.into_policy().unwrap();
        assert_eq!(back.resources, vec!["articles:1"]);
        assert_eq!(back.actions, vec!["update"]);
    }

    #[test]
    fn document_manager_serves_from_cache() {
        let manager = DocumentManager::new(MemoryDocumentStore::new());
        manager.create(policy("fuac.a")).unwrap();
        assert!(matches!(
            manager.create(policy("fuac.a")),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(manager.get("fuac.a").unwrap().description, "doc");

        // A second manager over the same rows sees them after load().
        let rows = manager.store.scan().unwrap();
        let other = DocumentManager::new(MemoryDocumentStore::new());
        for row in rows {
            let id = row["id"].as_str().unwrap().to_string();
            other.store.put(&id, row).unwrap();
        }
        assert!(matches!(
            other.get("fuac.a"),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(other.load().unwrap(), 1);
        assert_eq!(other.get("fuac.a").unwrap().id, "fuac.a");
    }

    #[test]
    fn change_feed_application() {
        let manager = DocumentManager::new(MemoryDocumentStore::new());
        let first = PolicyDocument::from_policy(&policy("feed.a")).unwrap();
        manager.apply_change(None, Some(first.clone())).unwrap();
        assert_eq!(manager.get("feed.a").unwrap().id, "feed.a");

        // Replacement under a new id drops the old entry.
        let renamed = PolicyDocument::from_policy(&policy("feed.b")).unwrap();
        manager
            .apply_change(Some(first), Some(renamed.clone()))
            .unwrap();
        assert!(matches!(
            manager.get("feed.a"),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(manager.get("feed.b").unwrap().id, "feed.b");

        manager.apply_change(Some(renamed), None).unwrap();
        assert!(matches!(
            manager.get("feed.b"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn acl_manager_narrows_candidates() {
        let manager = AclManager::new(MemoryDocumentStore::new());
        let mut matching = policy("acl.match");
        matching.resources = vec!["articles:<[0-9]+>".to_string()];
        let mut other = policy("acl.other");
        other.resources = vec!["billing:<.*>".to_string()];
        manager.create(matching).unwrap();
        manager.create(other).unwrap();

        let request = Request {
            resource: "articles:42".to_string(),
            action: "create".to_string(),
            subjects: vec!["user:alice".to_string(), "role:admin".to_string()],
            context: Default::default(),
        };
        let candidates = manager.find_request_candidates(&request).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "acl.match");
    }
}

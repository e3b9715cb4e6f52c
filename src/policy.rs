//! Policy value types.
//!
//! A [`Policy`] names who (`subjects`) may or may not (`effect`) do what
//! (`actions`) to which targets (`resources`), optionally guarded by
//! [`Conditions`](crate::conditions::Conditions). Records are immutable
//! once stored; updates replace the whole record.

use serde::{Deserialize, Serialize};

use crate::compiler::{self, CompileError};
use crate::conditions::Conditions;

/// Whether a matching policy grants or forbids access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// The delimiter pair bracketing regex fragments in this policy's
/// patterns. Not part of the wire schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub start: u8,
    pub end: u8,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            start: b'<',
            end: b'>',
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("subject missing")]
    MissingSubjects,
    #[error("invalid identity: {0}")]
    MalformedIdentity(String),
    #[error("identity already attached: {0}")]
    DuplicateIdentity(String),
    #[error("identity not attached: {0}")]
    IdentityNotAttached(String),
    #[error("invalid policy id format: {0}")]
    MalformedId(String),
    #[error("invalid pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: CompileError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub subjects: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(skip)]
    pub delimiters: Delimiters,
}

impl Policy {
    /// True if this policy grants access when it applies.
    pub fn allows_access(&self) -> bool {
        self.effect == Effect::Allow
    }

    pub fn start_delimiter(&self) -> u8 {
        self.delimiters.start
    }

    pub fn end_delimiter(&self) -> u8 {
        self.delimiters.end
    }

    /// True if `identity` is literally present among the subjects.
    pub fn has_identity(&self, identity: &str) -> bool {
        self.subjects.iter().any(|subject| subject == identity)
    }

    /// Append an identity (e.g. `user:alice`, `role:admin`) to the
    /// subjects.
    pub fn attach_identity(&mut self, identity: &str) -> Result<(), PolicyError> {
        if self.has_identity(identity) {
            return Err(PolicyError::DuplicateIdentity(identity.to_string()));
        }
        check_identity(identity)?;
        self.subjects.push(identity.to_string());
        Ok(())
    }

    /// Remove an identity from the subjects.
    pub fn detach_identity(&mut self, identity: &str) -> Result<(), PolicyError> {
        match self.subjects.iter().position(|subject| subject == identity) {
            Some(index) => {
                self.subjects.remove(index);
                Ok(())
            }
            None => Err(PolicyError::IdentityNotAttached(identity.to_string())),
        }
    }

    /// Validate the policy record itself. Subjects must be present;
    /// the effect is already constrained by [`Effect`] at decode time.
    ///
    /// Subjects are not forced into `kind:name` form here: wildcard
    /// patterns such as `<.*>` are legitimate subjects, so the identity
    /// syntax is only enforced where identities are attached one by one.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.subjects.is_empty() {
            return Err(PolicyError::MissingSubjects);
        }
        Ok(())
    }

    /// Check that every pattern on the policy compiles. Storage adapters
    /// run this at write time so uncompilable patterns never reach the
    /// decision path.
    pub fn check_patterns(&self) -> Result<(), PolicyError> {
        let all = self
            .subjects
            .iter()
            .chain(self.resources.iter())
            .chain(self.actions.iter());
        for pattern in all {
            compiler::compile(pattern, self.delimiters.start, self.delimiters.end).map_err(
                |source| PolicyError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                },
            )?;
        }
        Ok(())
    }

    /// Split a `<realm>.<name>` policy id into its two halves. Policy ids
    /// use `.`-separated segments; this is a different syntax from subject
    /// identities, which use `:`.
    pub fn check_id(&self) -> Result<(&str, &str), PolicyError> {
        match self.id.split_once('.') {
            Some((realm, rest)) if !realm.is_empty() && !rest.is_empty() => Ok((realm, rest)),
            _ => Err(PolicyError::MalformedId(self.id.clone())),
        }
    }
}

/// An identity is `kind:name`, e.g. `user:alice` or `role:admin`.
fn check_identity(identity: &str) -> Result<(), PolicyError> {
    if identity.splitn(2, ':').count() < 2 {
        return Err(PolicyError::MalformedIdentity(identity.to_string()));
    }
    Ok(())
}

/// Single-valued policy shape: exactly one resource and one action per
/// record. This is a storage-layout convenience that converts into the
/// canonical [`Policy`]; it is not a separate runtime representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acl {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub subjects: Vec<String>,
    pub effect: Effect,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub conditions: Conditions,
}

impl Acl {
    pub fn allows_access(&self) -> bool {
        self.effect == Effect::Allow
    }

    pub fn resources(&self) -> &[String] {
        std::slice::from_ref(&self.resource)
    }

    pub fn actions(&self) -> &[String] {
        std::slice::from_ref(&self.action)
    }

    pub fn start_delimiter(&self) -> u8 {
        Delimiters::default().start
    }

    pub fn end_delimiter(&self) -> u8 {
        Delimiters::default().end
    }
}

impl From<Acl> for Policy {
    fn from(acl: Acl) -> Self {
        Policy {
            id: acl.id,
            description: acl.description,
            subjects: acl.subjects,
            effect: acl.effect,
            resources: vec![acl.resource],
            actions: vec![acl.action],
            conditions: acl.conditions,
            delimiters: Delimiters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Policy {
        Policy {
            id: "fuac.articles".to_string(),
            description: "article authors".to_string(),
            subjects: vec!["user:<.+>".to_string()],
            effect: Effect::Allow,
            resources: vec!["articles:<[0-9]+>".to_string()],
            actions: vec!["create".to_string(), "update".to_string()],
            conditions: Conditions::default(),
            delimiters: Delimiters::default(),
        }
    }

    #[test]
    fn effect_gates_access() {
        let mut policy = sample();
        assert!(policy.allows_access());
        policy.effect = Effect::Deny;
        assert!(!policy.allows_access());
    }

    #[test]
    fn attach_rejects_duplicates_and_malformed() {
        let mut policy = sample();
        policy.attach_identity("role:editor").unwrap();
        assert!(policy.has_identity("role:editor"));
        assert!(matches!(
            policy.attach_identity("role:editor"),
            Err(PolicyError::DuplicateIdentity(_))
        ));
        assert!(matches!(
            policy.attach_identity("no-separator"),
            Err(PolicyError::MalformedIdentity(_))
        ));
    }

    #[test]
    fn detach_requires_presence() {
        let mut policy = sample();
        policy.attach_identity("role:editor").unwrap();
        policy.detach_identity("role:editor").unwrap();
        assert!(matches!(
            policy.detach_identity("role:editor"),
            Err(PolicyError::IdentityNotAttached(_))
        ));
    }

    #[test]
    fn validate_requires_subjects() {
        let mut policy = sample();
        policy.validate().unwrap();
        policy.subjects.clear();
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::MissingSubjects)
        ));
    }

    #[test]
    fn wildcard_subject_is_valid() {
        let mut policy = sample();
        policy.subjects = vec!["<.*>".to_string()];
        policy.validate().unwrap();
    }

    #[test]
    fn check_patterns_rejects_bad_regex() {
        let mut policy = sample();
        policy.check_patterns().unwrap();
        policy.resources.push("articles:<[0-9+>".to_string());
        assert!(matches!(
            policy.check_patterns(),
            Err(PolicyError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn policy_id_splits_on_first_dot() {
        let mut policy = sample();
        let (realm, name) = policy.check_id().unwrap();
        assert_eq!((realm, name), ("fuac", "articles"));
        policy.id = "realm.svc.admin".to_string();
        assert_eq!(policy.check_id().unwrap(), ("realm", "svc.admin"));
        policy.id = "flat".to_string();
        assert!(matches!(
            policy.check_id(),
            Err(PolicyError::MalformedId(_))
        ));
    }

    #[test]
    fn acl_exposes_one_element_slices() {
        let acl = Acl {
            id: "a.1".to_string(),
            description: String::new(),
            subjects: vec!["user:alice".to_string()],
            effect: Effect::Allow,
            resource: "articles:1".to_string(),
            action: "create".to_string(),
            conditions: Conditions::default(),
        };
        assert_eq!(acl.resources(), ["articles:1".to_string()]);
        assert_eq!(acl.actions(), ["create".to_string()]);
        assert_eq!(acl.start_delimiter(), b'<');
        assert_eq!(acl.end_delimiter(), b'>');

        let policy = Policy::from(acl);
        assert_eq!(policy.resources, vec!["articles:1"]);
        assert_eq!(policy.actions, vec!["create"]);
    }
}

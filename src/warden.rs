//! The decision engine.
//!
//! `Warden::is_allowed` fetches candidate policies from its storage
//! manager, narrows them with the compiled subject/resource/action
//! patterns, evaluates the surviving policies' conditions, and combines
//! effects: one fulfilled deny forbids the request regardless of any
//! allows, and with no applicable policy at all the answer is the default
//! deny.

use std::collections::HashSet;
use std::sync::Arc;

use crate::audit::{AuditRecord, AuditSink};
use crate::compiler;
use crate::conditions::MatchContext;
use crate::manager::{Manager, StorageError};
use crate::policy::Policy;
use crate::request::Request;

/// Outcome channel of [`Warden::is_allowed`]. `Denied` and
/// `NotApplicable` are decision outcomes rather than engine failures;
/// callers treat both as "forbidden".
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("access denied by policy {policy_id}")]
    Denied { policy_id: String },
    #[error("no policy applies to the request")]
    NotApplicable,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AccessError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Denied { .. } | Self::NotApplicable)
    }
}

pub struct Warden {
    manager: Arc<dyn Manager>,
    audit: AuditSink,
}

impl Warden {
    pub fn new(manager: Arc<dyn Manager>) -> Self {
        Self {
            manager,
            audit: AuditSink::disabled(),
        }
    }

    pub fn with_audit(manager: Arc<dyn Manager>, audit: AuditSink) -> Self {
        Self { manager, audit }
    }

    /// Decide whether the request is permitted. `Ok(())` means some allow
    /// policy applied and no deny policy did.
    pub fn is_allowed(&self, request: &Request) -> Result<(), AccessError> {
        validate_request(request)?;

        let candidates = self.manager.find_request_candidates(request)?;
        tracing::trace!(candidates = candidates.len(), resource = %request.resource,
            action = %request.action, "evaluating decision request");

        let mut seen = HashSet::new();
        let mut allowed_by: Option<&Policy> = None;
        for policy in &candidates {
            // Composite backends may hand the same policy back twice.
            if !seen.insert(policy.id.as_str()) {
                continue;
            }
            let Some(subject) = acting_subject(policy, request) else {
                continue;
            };
            if !any_pattern_matches(policy, &policy.resources, &request.resource) {
                continue;
            }
            if !any_pattern_matches(policy, &policy.actions, &request.action) {
                continue;
            }
            if !conditions_fulfilled(policy, request, subject) {
                tracing::debug!(policy = %policy.id, "conditions not fulfilled");
                continue;
            }

            if !policy.allows_access() {
                tracing::info!(policy = %policy.id, subject, "denying");
                self.audit.record(&AuditRecord::denied(request, &policy.id));
                return Err(AccessError::Denied {
                    policy_id: policy.id.clone(),
                });
            }
            tracing::debug!(policy = %policy.id, subject, "policy allows");
            allowed_by = Some(policy);
        }

        match allowed_by {
            Some(policy) => {
                self.audit
                    .record(&AuditRecord::granted(request, &policy.id));
                Ok(())
            }
            None => {
                self.audit.record(&AuditRecord::not_applicable(request));
                Err(AccessError::NotApplicable)
            }
        }
    }
}

fn validate_request(request: &Request) -> Result<(), AccessError> {
    if request.resource.is_empty() {
        return Err(AccessError::InvalidRequest("resource missing"));
    }
    if request.action.is_empty() {
        return Err(AccessError::InvalidRequest("action missing"));
    }
    if request.subjects.is_empty() {
        return Err(AccessError::InvalidRequest("subject missing"));
    }
    Ok(())
}

/// First request subject matched by any of the policy's subject patterns.
/// That subject is the one conditions compare against.
fn acting_subject<'a>(policy: &Policy, request: &'a Request) -> Option<&'a str> {
    request
        .subjects
        .iter()
        .find(|subject| any_pattern_matches(policy, &policy.subjects, subject))
        .map(String::as_str)
}

/// Anchored match of `value` against any of the patterns. A stored
/// pattern that no longer compiles is skipped with a warning; the engine
/// stays decisive even over bad records.
fn any_pattern_matches(policy: &Policy, patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|pattern| {
        match compiler::compiled(pattern, policy.delimiters.start, policy.delimiters.end) {
            Ok(regex) => regex.is_match(value),
            Err(error) => {
                tracing::warn!(policy = %policy.id, pattern = %pattern, %error,
                    "skipping stored pattern that fails to compile");
                false
            }
        }
    })
}

fn conditions_fulfilled(policy: &Policy, request: &Request, subject: &str) -> bool {
    let ctx = MatchContext {
        request,
        subject,
        delimiters: policy.delimiters,
    };
    policy
        .conditions
        .iter()
        .all(|(key, condition)| condition.fulfills(key, &ctx))
}

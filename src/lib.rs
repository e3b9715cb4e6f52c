//! Core library for Warden, an access-control decision engine.
//!
//! A decision request (subjects, action, resource, context) is checked
//! against stored policies whose subject/resource/action patterns may
//! embed regex fragments between `<` and `>`. Matching policies have
//! their conditions evaluated against the request context, and the
//! surviving effects combine under deny-overrides-allow. Storage is
//! pluggable behind the [`manager::Manager`] trait; the crate ships an
//! in-memory registry, a document-store layout, and a read-only
//! composite.

pub mod audit;
pub mod compiler;
pub mod conditions;
mod config;
pub mod gateway;
pub mod jsonpath;
pub mod manager;
pub mod policy;
pub mod request;
pub mod warden;

pub use audit::{AuditRecord, AuditSink};
pub use compiler::{compile, CompileError};
pub use conditions::{
    BodyArrayMatch, BodyMatch, Condition, ConditionFactory, Conditions, EqualsSubject,
    JsonBodyMatch, MatchContext, MatchMode, StringMatch,
};
pub use config::{AppConfig, AuditConfig};
pub use gateway::{app, build_request, AppState};
pub use manager::{CompositeManager, Manager, MemoryManager, StorageError};
pub use policy::{Acl, Delimiters, Effect, Policy, PolicyError};
pub use request::{BodyCapsule, Context, RawHttpRequest, Request, KEY_RAW_REQUEST};
pub use warden::{AccessError, Warden};

use std::sync::Arc;

/// Build the application state from environment variables: seed the
/// in-memory manager from `WARDEN_POLICY_FILE`, wire the audit sink, and
/// hand back state ready for [`gateway::app`].
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    build_state(config)
}

pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let manager = Arc::new(MemoryManager::new());
    for policy in config.policies {
        let id = policy.id.clone();
        manager
            .create(policy)
            .map_err(|err| anyhow::anyhow!("seeding policy {id}: {err}"))?;
    }
    tracing::info!(policies = manager.len(), "policy registry seeded");

    let audit = match config.audit.file.as_deref() {
        Some(path) => AuditSink::to_file(
            path,
            config.audit.max_bytes,
            config.audit.keep,
            config.audit.compress,
        )
        .map_err(|err| anyhow::anyhow!("opening AUDIT_LOG_FILE '{path}': {err}"))?,
        None => AuditSink::disabled(),
    };

    Ok(AppState {
        warden: Arc::new(Warden::with_audit(manager, audit)),
        max_request_bytes: config.max_request_bytes,
    })
}

//! Metadata and relation hooks run over admitted requests.
//!
//! Hooks are plain closures from [`RequestDetails`] to [`HookResult`]. The
//! pipeline runs them in registration order and passes the results on
//! untouched; interpreting them is the sink's job.

use crate::request::RequestDetails;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Opaque handle to a domain object a request relates to.
///
/// Only the kind and identifier are carried; resolving the object is left
/// to whoever persists the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Output of a hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HookResult {
    /// A key/value pair stored alongside the request.
    Meta {
        key: String,
        value: serde_json::Value,
    },
    /// A link between the request and a domain entity.
    Relation {
        entity: EntityRef,
        reason: Option<String>,
    },
}

impl HookResult {
    pub fn meta(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        HookResult::Meta {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn relation(entity: EntityRef, reason: Option<&str>) -> Self {
        HookResult::Relation {
            entity,
            reason: reason.map(str::to_string),
        }
    }
}

/// A registered hook.
pub type Hook = Arc<dyn Fn(&RequestDetails) -> HookResult + Send + Sync>;

/// Ordered metadata and relation hooks.
#[derive(Clone, Default)]
pub struct HookPipeline {
    meta_hooks: Vec<Hook>,
    relation_hooks: Vec<Hook>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_meta_hook<F>(&mut self, hook: F)
    where
        F: Fn(&RequestDetails) -> HookResult + Send + Sync + 'static,
    {
        self.meta_hooks.push(Arc::new(hook));
    }

    pub fn add_relation_hook<F>(&mut self, hook: F)
    where
        F: Fn(&RequestDetails) -> HookResult + Send + Sync + 'static,
    {
        self.relation_hooks.push(Arc::new(hook));
    }

    /// Attach a fixed key/value to every recorded request.
    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let result = HookResult::meta(key, value);
        self.add_meta_hook(move |_| result.clone());
    }

    /// Relate every recorded request to `entity`.
    pub fn add_relation(&mut self, entity: EntityRef, reason: Option<&str>) {
        let result = HookResult::relation(entity, reason);
        self.add_relation_hook(move |_| result.clone());
    }

    pub fn meta_hooks(&self) -> &[Hook] {
        &self.meta_hooks
    }

    pub fn relation_hooks(&self) -> &[Hook] {
        &self.relation_hooks
    }

    /// One result per metadata hook, in registration order.
    pub fn run_meta_hooks(&self, details: &RequestDetails) -> Vec<HookResult> {
        self.meta_hooks.iter().map(|hook| hook(details)).collect()
    }

    /// One result per relation hook, in registration order.
    pub fn run_relation_hooks(&self, details: &RequestDetails) -> Vec<HookResult> {
        self.relation_hooks.iter().map(|hook| hook(details)).collect()
    }
}

impl fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPipeline")
            .field("meta_hooks", &self.meta_hooks.len())
            .field("relation_hooks", &self.relation_hooks.len())
            .finish()
    }
}

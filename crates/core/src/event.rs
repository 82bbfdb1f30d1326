//! Watch events and reconcile requests.

use serde::{Deserialize, Serialize};

/// Request to reconcile one namespace. Namespaces are cluster-scoped, so the
/// name alone identifies the object. All other state is re-read on each run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub name: String,
}

impl ReconcileRequest {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }
}

/// Namespace change as seen by the watch layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEvent {
    Added(String),
    Updated(String),
    Deleted(String),
}

impl WatchEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Added(n) | Self::Updated(n) | Self::Deleted(n) => n,
        }
    }

    pub fn into_request(self) -> ReconcileRequest {
        match self {
            Self::Added(n) | Self::Updated(n) | Self::Deleted(n) => ReconcileRequest { name: n },
        }
    }
}

/// Watch-level gate deciding which events become reconcile requests.
///
/// Only raw events are visible here; relevance against the configured
/// criteria is decided inside the reconcile step.
pub trait EventFilter: Send + Sync {
    fn should_enqueue(&self, event: &WatchEvent) -> bool;
}

/// Enqueues every add and update, ignores deletes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddUpdateFilter;

impl EventFilter for AddUpdateFilter {
    fn should_enqueue(&self, event: &WatchEvent) -> bool {
        matches!(event, WatchEvent::Added(_) | WatchEvent::Updated(_))
    }
}

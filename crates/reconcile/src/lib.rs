//! nsward reconcile loop.
//!
//! A [`Reconciler`] receives a [`ReconcileRequest`], reads a fresh
//! [`NamespaceSnapshot`] through a [`NamespaceReader`], evaluates the current
//! [`CriteriaSet`] and, on a match, hands the snapshot to an [`ActionHook`].
//! Retry policy is not decided here: errors go back to the caller (see
//! [`worker::run_workers`]) which owns backoff.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use nsward_core::{CriteriaSet, NamespaceSnapshot, ReconcileRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod worker;

pub use worker::run_workers;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reading a namespace from the read collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("namespace not found")]
    NotFound,
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    #[error("transient read failure: {0}")]
    Transient(#[source] BoxError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to get namespace {name}: {source}")]
    Fetch { name: String, #[source] source: ReadError },
    #[error("action for namespace {name} failed: {source}")]
    Action { name: String, #[source] source: BoxError },
    #[error("reconcile of namespace {name} cancelled")]
    Cancelled { name: String },
}

impl ReconcileError {
    pub fn name(&self) -> &str {
        match self {
            Self::Fetch { name, .. } | Self::Action { name, .. } | Self::Cancelled { name } => name,
        }
    }

    /// Cancellation is a shutdown signal, not a failure worth retrying.
    pub fn is_retryable(&self) -> bool { !matches!(self, Self::Cancelled { .. }) }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch_error",
            Self::Action { .. } => "action_error",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Successful reconcile result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No criterion matched; nothing to do.
    Skipped,
    /// Matched and the action hook completed.
    Acted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Acted => "acted",
        }
    }
}

/// Point-in-time namespace reads.
#[async_trait::async_trait]
pub trait NamespaceReader: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<NamespaceSnapshot, ReadError>;
}

/// Downstream work for a namespace that matched. Must be idempotent.
#[async_trait::async_trait]
pub trait ActionHook: Send + Sync {
    async fn on_match(&self, snapshot: &NamespaceSnapshot) -> Result<(), BoxError>;
}

/// Default hook: records the match and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogActionHook;

#[async_trait::async_trait]
impl ActionHook for LogActionHook {
    async fn on_match(&self, snapshot: &NamespaceSnapshot) -> Result<(), BoxError> {
        info!(namespace = %snapshot.name, "reconciling namespace");
        Ok(())
    }
}

/// Swappable criteria shared between the reconciler and whoever reloads config.
#[derive(Clone)]
pub struct CriteriaHandle(Arc<ArcSwap<CriteriaSet>>);

impl CriteriaHandle {
    pub fn new(set: CriteriaSet) -> Self { Self(Arc::new(ArcSwap::from_pointee(set))) }
    pub fn load(&self) -> Arc<CriteriaSet> { self.0.load_full() }
    pub fn replace(&self, set: CriteriaSet) { self.0.store(Arc::new(set)); }
}

impl std::fmt::Debug for CriteriaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CriteriaHandle").field(&*self.load()).finish()
    }
}

pub struct Reconciler {
    reader: Arc<dyn NamespaceReader>,
    hook: Arc<dyn ActionHook>,
    criteria: CriteriaHandle,
}

impl Reconciler {
    pub fn new(reader: Arc<dyn NamespaceReader>, hook: Arc<dyn ActionHook>, criteria: CriteriaHandle) -> Self {
        Self { reader, hook, criteria }
    }

    pub fn criteria(&self) -> &CriteriaHandle { &self.criteria }

    /// Fetch, decide, act. Holds nothing across calls.
    pub async fn reconcile(&self, req: &ReconcileRequest, cancel: &CancellationToken) -> Result<Outcome, ReconcileError> {
        let started = Instant::now();
        let res = self.run(req, cancel).await;
        let label = match &res {
            Ok(o) => o.as_str(),
            Err(e) => e.kind(),
        };
        metrics::counter!("nsward_reconcile_total", 1, "outcome" => label);
        metrics::histogram!("nsward_reconcile_duration_ms", started.elapsed().as_secs_f64() * 1000.0);
        res
    }

    async fn run(&self, req: &ReconcileRequest, cancel: &CancellationToken) -> Result<Outcome, ReconcileError> {
        let name = req.name.as_str();
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled { name: name.to_string() }),
            res = self.reader.get_namespace(name) => {
                res.map_err(|source| ReconcileError::Fetch { name: name.to_string(), source })?
            }
        };

        let criteria = self.criteria.load();
        match criteria.first_match(&snapshot) {
            Some(c) => debug!(namespace = %name, key = %c.key(), "criteria matched"),
            None => {
                // A namespace that stopped matching gets no converse action.
                debug!(namespace = %name, criteria = criteria.len(), "no criteria matched; skipping");
                return Ok(Outcome::Skipped);
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReconcileError::Cancelled { name: name.to_string() }),
            res = self.hook.on_match(&snapshot) => {
                res.map_err(|source| ReconcileError::Action { name: name.to_string(), source })?;
                Ok(Outcome::Acted)
            }
        }
    }
}

//! nsward kubehub: namespace reads and watcher wiring against the cluster API.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::Api,
    runtime::{watcher::{self, Event}, WatchStreamExt},
    Client, ResourceExt,
};
use nsward_core::{EventFilter, KeyValues, NamespaceSnapshot, WatchEvent};
use nsward_queue::WorkQueue;
use nsward_reconcile::{NamespaceReader, ReadError};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

/// Build a snapshot from a namespace object. Absent label/annotation maps become empty.
pub fn snapshot_from(ns: &Namespace) -> NamespaceSnapshot {
    let meta = &ns.metadata;
    let labels = meta.labels.as_ref().map(|m| KeyValues::from_pairs(m.iter().map(|(k, v)| (k.as_str(), v.as_str()))));
    let annotations = meta.annotations.as_ref().map(|m| KeyValues::from_pairs(m.iter().map(|(k, v)| (k.as_str(), v.as_str()))));
    NamespaceSnapshot {
        name: ns.name_any(),
        labels: labels.unwrap_or_default(),
        annotations: annotations.unwrap_or_default(),
        resource_version: meta.resource_version.clone(),
    }
}

/// Reads namespaces with a per-call timeout.
#[derive(Clone)]
pub struct KubeNamespaceReader {
    api: Api<Namespace>,
    timeout: Duration,
}

impl KubeNamespaceReader {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { api: Api::all(client), timeout }
    }
}

#[async_trait::async_trait]
impl NamespaceReader for KubeNamespaceReader {
    async fn get_namespace(&self, name: &str) -> Result<NamespaceSnapshot, ReadError> {
        match tokio::time::timeout(self.timeout, self.api.get(name)).await {
            Err(_) => Err(ReadError::Timeout(self.timeout)),
            Ok(Ok(ns)) => Ok(snapshot_from(&ns)),
            Ok(Err(kube::Error::Api(resp))) if resp.code == 404 => Err(ReadError::NotFound),
            Ok(Err(e)) => Err(ReadError::Transient(Box::new(e))),
        }
    }
}

/// Turns raw watcher events into add/update/delete by remembering the last
/// resourceVersion seen per namespace. Re-delivery of an unchanged version is dropped,
/// so a watch restart does not re-enqueue namespaces that did not change; there is
/// no periodic resync.
#[derive(Debug, Default)]
pub struct EventClassifier {
    seen: FxHashMap<String, Option<String>>,
}

impl EventClassifier {
    pub fn new() -> Self { Self::default() }
    pub fn tracked(&self) -> usize { self.seen.len() }

    pub fn classify(&mut self, event: Event<Namespace>) -> Vec<WatchEvent> {
        match event {
            Event::Applied(ns) => self.applied(&ns).into_iter().collect(),
            Event::Deleted(ns) => {
                let name = ns.name_any();
                self.seen.remove(&name);
                vec![WatchEvent::Deleted(name)]
            }
            Event::Restarted(list) => {
                debug!(count = list.len(), "watch restart");
                let mut out: Vec<WatchEvent> = list.iter().filter_map(|ns| self.applied(ns)).collect();
                // Anything we knew about that is missing from the relist was deleted meanwhile.
                let live: rustc_hash::FxHashSet<String> = list.iter().map(|ns| ns.name_any()).collect();
                let mut gone: Vec<String> = self.seen.keys().filter(|n| !live.contains(*n)).cloned().collect();
                gone.sort_unstable();
                for name in gone {
                    self.seen.remove(&name);
                    out.push(WatchEvent::Deleted(name));
                }
                out
            }
        }
    }

    fn applied(&mut self, ns: &Namespace) -> Option<WatchEvent> {
        let name = ns.name_any();
        let rv = ns.resource_version();
        match self.seen.insert(name.clone(), rv.clone()) {
            None => Some(WatchEvent::Added(name)),
            Some(prev) if prev.is_some() && prev == rv => None,
            Some(_) => Some(WatchEvent::Updated(name)),
        }
    }
}

fn event_kind(ev: &WatchEvent) -> &'static str {
    match ev {
        WatchEvent::Added(_) => "added",
        WatchEvent::Updated(_) => "updated",
        WatchEvent::Deleted(_) => "deleted",
    }
}

/// Hand one classified event to the queue if the filter lets it through.
/// A delete always clears the namespace's pending work and retries.
pub fn dispatch(event: &WatchEvent, filter: &dyn EventFilter, queue: &WorkQueue) -> bool {
    let kind = event_kind(event);
    metrics::counter!("nsward_watch_events_total", 1, "kind" => kind);
    if let WatchEvent::Deleted(name) = event {
        queue.remove(name);
    }
    if filter.should_enqueue(event) {
        queue.add(event.name());
        true
    } else {
        debug!(namespace = %event.name(), kind, "event filtered out");
        false
    }
}

/// List+watch all namespaces and enqueue a reconcile request per relevant event.
/// Returns when the watch stream ends.
pub async fn start_watcher(client: Client, filter: Arc<dyn EventFilter>, queue: Arc<WorkQueue>) -> Result<()> {
    let api: Api<Namespace> = Api::all(client);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut classifier = EventClassifier::new();
    info!("namespace watcher started");
    while let Some(ev) = stream.next().await {
        match ev {
            Ok(ev) => {
                for we in classifier.classify(ev) {
                    dispatch(&we, filter.as_ref(), &queue);
                }
            }
            Err(e) => warn!(error = %e, "namespace watch error; backing off"),
        }
    }
    warn!(tracked = classifier.tracked(), "namespace watcher stream ended");
    Ok(())
}

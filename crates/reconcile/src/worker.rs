//! Worker tasks draining the work queue into the reconciler.

use std::sync::Arc;

use nsward_core::ReconcileRequest;
use nsward_queue::WorkQueue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ReconcileError, Reconciler};

/// Spawn `workers` tasks and wait until all of them stop.
///
/// Workers stop when `cancel` fires or the queue is shut down. A failed
/// reconcile is re-queued with the queue's backoff; a success resets it.
pub async fn run_workers(queue: Arc<WorkQueue>, reconciler: Arc<Reconciler>, workers: usize, cancel: CancellationToken) {
    let workers = workers.max(1);
    info!(workers, "starting reconcile workers");
    let handles: Vec<_> = (0..workers)
        .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&queue), Arc::clone(&reconciler), cancel.clone())))
        .collect();
    for h in handles {
        if let Err(e) = h.await {
            warn!(error = %e, "worker task failed");
        }
    }
    info!("reconcile workers stopped");
}

async fn worker_loop(id: usize, queue: Arc<WorkQueue>, reconciler: Arc<Reconciler>, cancel: CancellationToken) {
    loop {
        let name = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.pop() => match next {
                Some(n) => n,
                None => break,
            },
        };
        let req = ReconcileRequest::new(name.clone());
        let stop = match reconciler.reconcile(&req, &cancel).await {
            Ok(outcome) => {
                queue.forget(&name);
                debug!(worker = id, namespace = %name, outcome = outcome.as_str(), "reconciled");
                false
            }
            Err(e @ ReconcileError::Cancelled { .. }) => {
                debug!(worker = id, error = %e, "stopping on cancellation");
                true
            }
            Err(e) => {
                let delay = queue.requeue_backoff(&name);
                warn!(worker = id, namespace = %name, error = %e, retry_in_ms = delay.as_millis() as u64, "reconcile failed; will retry");
                false
            }
        };
        queue.done(&name);
        if stop {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}

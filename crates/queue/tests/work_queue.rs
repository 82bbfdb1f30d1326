#![forbid(unsafe_code)]

use std::time::Duration;

use nsward_queue::{Backoff, WorkQueue};

#[tokio::test]
async fn pop_returns_names_in_fifo_order_without_duplicates() {
    let q = WorkQueue::new(Backoff::default());
    for n in ["a", "b", "a", "c", "b"] { q.add(n); }
    assert_eq!(q.len(), 3);
    let mut got = Vec::new();
    for _ in 0..3 {
        let n = q.pop().await.unwrap();
        q.done(&n);
        got.push(n);
    }
    assert_eq!(got, vec!["a", "b", "c"]);
    assert!(q.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_worker_wakes_on_add() {
    let q = WorkQueue::new(Backoff::default());
    let waiter = tokio::spawn({
        let q = q.clone();
        async move { q.pop().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    q.add("late");
    let got = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert_eq!(got.as_deref(), Some("late"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_releases_waiters() {
    let q = WorkQueue::new(Backoff::default());
    let waiter = tokio::spawn({
        let q = q.clone();
        async move { q.pop().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    q.shutdown();
    let got = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert_eq!(got, None);
    q.add("ignored");
    assert!(q.is_empty());
}

#[tokio::test(start_paused = true)]
async fn requeue_backoff_delays_and_grows() {
    let q = WorkQueue::new(Backoff { base: Duration::from_millis(100), max: Duration::from_secs(1) });
    q.add("flaky");
    let n = q.pop().await.unwrap();
    assert_eq!(q.requeue_backoff(&n), Duration::from_millis(100));
    q.done(&n);
    assert!(q.is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(q.len(), 1);
    let n = q.pop().await.unwrap();
    assert_eq!(q.requeue_backoff(&n), Duration::from_millis(200));
    q.done(&n);

    // success resets the attempt count and cancels the pending retry
    q.forget("flaky");
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(q.is_empty());
    q.add("flaky");
    let n = q.pop().await.unwrap();
    assert_eq!(q.requeue_backoff(&n), Duration::from_millis(100));
    q.done(&n);
}

#[tokio::test(start_paused = true)]
async fn deleted_namespace_is_not_retried() {
    let q = WorkQueue::new(Backoff { base: Duration::from_millis(100), max: Duration::from_secs(1) });
    q.add("doomed");
    let n = q.pop().await.unwrap();
    // deleted while its reconcile is failing
    q.remove(&n);
    q.requeue_backoff(&n);
    q.done(&n);
    assert_eq!(q.failures("doomed"), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(q.is_empty());
}

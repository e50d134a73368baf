// src/dispatch/mod.rs
// FIFO execution-request queue with long-poll fan-out and heartbeat liveness.

use crate::model::ExecutionRequest;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

struct DispatchInner {
    /// Requests with no waiter yet, oldest first.
    queue: VecDeque<ExecutionRequest>,
    /// Parked long-poll responders, oldest first. One-shot: each delivers at
    /// most one request. A responder whose caller disconnected is skipped at
    /// delivery time.
    waiters: VecDeque<oneshot::Sender<ExecutionRequest>>,
    last_heartbeat: Option<Instant>,
}

/// Hands execution requests to the single active worker. Strictly FIFO in
/// both directions: the earliest-registered responder receives the
/// earliest-enqueued request.
pub struct Dispatcher {
    inner: Mutex<DispatchInner>,
    heartbeat_timeout: Duration,
}

impl Dispatcher {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(DispatchInner {
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
                last_heartbeat: None,
            }),
            heartbeat_timeout,
        }
    }

    /// Deliver `req` to the oldest live waiter, or queue it.
    pub fn enqueue(&self, mut req: ExecutionRequest) {
        let mut inner = self.inner.lock();
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(req) {
                Ok(()) => {
                    crate::metrics::record_dispatch();
                    return;
                }
                // Caller disconnected; try the next waiter.
                Err(returned) => req = returned,
            }
        }
        debug!("No waiter for execution request {}, queueing", req.run_id);
        inner.queue.push_back(req);
    }

    /// Return the next pending request, waiting up to `timeout` for one to
    /// arrive. Returns `None` on timeout. A caller that disconnects mid-wait
    /// drops its receiver and is skipped by later enqueues.
    pub async fn poll(&self, timeout: Duration) -> Option<ExecutionRequest> {
        let rx = {
            let mut inner = self.inner.lock();
            if let Some(req) = inner.queue.pop_front() {
                crate::metrics::record_dispatch();
                return Some(req);
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(req)) => Some(req),
            _ => None,
        }
    }

    /// Stamp worker liveness. Any inbound worker call counts.
    pub fn heartbeat(&self) {
        self.inner.lock().last_heartbeat = Some(Instant::now());
    }

    /// Watchdog check. Returns true exactly once when a stamped heartbeat has
    /// gone silent past the timeout; the stamp is cleared so continued
    /// silence does not re-fire. Also prunes waiters whose callers left.
    pub fn liveness_check(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.waiters.retain(|tx| !tx.is_closed());
        match inner.last_heartbeat {
            Some(at) if at.elapsed() > self.heartbeat_timeout => {
                inner.last_heartbeat = None;
                true
            }
            _ => false,
        }
    }

    /// Number of undelivered requests (test and status surface).
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: &str) -> ExecutionRequest {
        ExecutionRequest {
            run_id: id.to_string(),
            flow_name: "F".to_string(),
            configuration: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn poll_returns_queued_request() {
        let d = Dispatcher::new(Duration::from_secs(10));
        d.enqueue(req("r1"));
        let got = d.poll(Duration::from_millis(50)).await;
        assert_eq!(got.unwrap().run_id, "r1");
    }

    #[tokio::test]
    async fn poll_times_out_to_none() {
        let d = Dispatcher::new(Duration::from_secs(10));
        assert!(d.poll(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn fifo_across_waiters() {
        let d = std::sync::Arc::new(Dispatcher::new(Duration::from_secs(10)));

        let d1 = d.clone();
        let p1 = tokio::spawn(async move { d1.poll(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let d2 = d.clone();
        let p2 = tokio::spawn(async move { d2.poll(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        d.enqueue(req("r1"));
        d.enqueue(req("r2"));

        assert_eq!(p1.await.unwrap().unwrap().run_id, "r1");
        assert_eq!(p2.await.unwrap().unwrap().run_id, "r2");
    }

    #[tokio::test]
    async fn second_request_queues_when_one_waiter() {
        let d = std::sync::Arc::new(Dispatcher::new(Duration::from_secs(10)));
        let d1 = d.clone();
        let p1 = tokio::spawn(async move { d1.poll(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        d.enqueue(req("r1"));
        d.enqueue(req("r2"));

        assert_eq!(p1.await.unwrap().unwrap().run_id, "r1");
        assert_eq!(d.pending(), 1);
        assert_eq!(
            d.poll(Duration::from_millis(20)).await.unwrap().run_id,
            "r2"
        );
    }

    #[tokio::test]
    async fn dead_waiter_is_skipped() {
        let d = Dispatcher::new(Duration::from_secs(10));
        // Waiter registers, then its caller disconnects (timeout).
        assert!(d.poll(Duration::from_millis(10)).await.is_none());
        d.enqueue(req("r1"));
        // The dead waiter must not swallow the request.
        assert_eq!(
            d.poll(Duration::from_millis(20)).await.unwrap().run_id,
            "r1"
        );
    }

    #[tokio::test]
    async fn liveness_fires_once_then_resets() {
        let d = Dispatcher::new(Duration::from_millis(30));
        assert!(!d.liveness_check(), "no heartbeat yet, no firing");
        d.heartbeat();
        assert!(!d.liveness_check());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(d.liveness_check(), "silence past timeout fires");
        assert!(!d.liveness_check(), "sentinel cleared, no re-fire");
    }
}

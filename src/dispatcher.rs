//! Task dispatch
//!
//! The accepting path validates a raw payload and hands a unit of work
//! (request plus one-shot responder) to a bounded queue; a fixed pool of
//! workers pulls units, runs the executor, and completes each responder
//! exactly once. The acceptor never waits on sandbox work, and the pool size
//! bounds how many executions run concurrently.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::languages::LanguageRegistry;
use crate::protocol::{ExecutionRequest, ResponseEnvelope, StatusCode};
use crate::supervisor::Executor;

/// Queued tuple of a validated request and the capability to answer it.
/// The responder is a one-shot sender, so delivering twice is
/// unrepresentable.
pub struct UnitOfWork {
    pub responder: oneshot::Sender<ResponseEnvelope>,
    pub request: ExecutionRequest,
    pub received_at: Instant,
}

pub struct Dispatcher {
    queue: mpsc::Sender<UnitOfWork>,
    registry: Arc<LanguageRegistry>,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn Executor>,
        registry: Arc<LanguageRegistry>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Self {
        let (queue, receiver) = mpsc::channel::<UnitOfWork>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            let executor = executor.clone();
            tokio::spawn(async move {
                loop {
                    // Lock held only while waiting for the next unit
                    let unit = { receiver.lock().await.recv().await };
                    let Some(unit) = unit else { break };

                    let queued_ms = unit.received_at.elapsed().as_millis() as u64;
                    debug!(worker_id, queued_ms, "Picked up unit of work");

                    let outcome = executor.execute(&unit.request).await;
                    let envelope = ResponseEnvelope::from(outcome);
                    if unit.responder.send(envelope).is_err() {
                        warn!(worker_id, "Caller went away before result delivery");
                    }
                }
                debug!(worker_id, "Worker exiting; queue closed");
            });
        }

        Self { queue, registry }
    }

    /// Accept a raw payload. Validation happens here, on the accepting task;
    /// anything invalid is answered immediately and never enqueued. The
    /// returned receiver is fulfilled exactly once.
    pub async fn on_request(&self, raw: &str) -> oneshot::Receiver<ResponseEnvelope> {
        let (responder, receiver) = oneshot::channel();

        let request = match serde_json::from_str::<ExecutionRequest>(raw) {
            Ok(request) => request,
            Err(e) => {
                let _ = responder.send(ResponseEnvelope::invalid(format!(
                    "malformed request: {}",
                    e
                )));
                return receiver;
            }
        };
        if let Err(e) = request.validate() {
            let _ = responder.send(ResponseEnvelope::invalid(e.to_string()));
            return receiver;
        }
        if let Err(e) = self.registry.get(&request.language) {
            let _ = responder.send(ResponseEnvelope::invalid(e.to_string()));
            return receiver;
        }

        let unit = UnitOfWork {
            responder,
            request,
            received_at: Instant::now(),
        };
        // Suspends when the queue is full; back-pressure, not rejection
        if let Err(e) = self.queue.send(unit).await {
            let unit = e.0;
            let _ = unit.responder.send(ResponseEnvelope::failure(
                StatusCode::Error,
                "worker pool is unavailable",
            ));
        }
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::testing::shipped_registry;
    use crate::protocol::ExecutionOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor stub that tracks call and concurrency counts
    struct MockExecutor {
        delay: Duration,
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl MockExecutor {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(&self, _request: &ExecutionRequest) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ExecutionOutcome {
                status: StatusCode::Ok,
                payload: Some(serde_json::json!("done")),
                message: "success".to_string(),
                duration_ms: self.delay.as_millis() as u64,
            }
        }
    }

    fn dispatcher(executor: Arc<MockExecutor>, workers: usize) -> Dispatcher {
        Dispatcher::new(executor, Arc::new(shipped_registry()), workers, 64)
    }

    #[tokio::test]
    async fn malformed_payload_never_reaches_the_pool() {
        let executor = MockExecutor::new(Duration::ZERO);
        let dispatcher = dispatcher(executor.clone(), 2);

        let envelope = dispatcher.on_request("{not json").await.await.unwrap();
        assert_eq!(envelope.code, 5000);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_code_is_rejected_on_the_accepting_path() {
        let executor = MockExecutor::new(Duration::ZERO);
        let dispatcher = dispatcher(executor.clone(), 2);

        let envelope = dispatcher
            .on_request(r#"{"language": "python", "code": ""}"#)
            .await
            .await
            .unwrap();
        assert_eq!(envelope.code, 5000);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_language_is_rejected_on_the_accepting_path() {
        let executor = MockExecutor::new(Duration::ZERO);
        let dispatcher = dispatcher(executor.clone(), 2);

        let envelope = dispatcher
            .on_request(r#"{"language": "cobol", "code": "DISPLAY 1"}"#)
            .await
            .await
            .unwrap();
        assert_eq!(envelope.code, 5000);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_request_is_executed_and_answered_once() {
        let executor = MockExecutor::new(Duration::ZERO);
        let dispatcher = dispatcher(executor.clone(), 2);

        let envelope = dispatcher
            .on_request(r#"{"language": "python", "code": "print(1)"}"#)
            .await
            .await
            .unwrap();
        assert_eq!(envelope.code, 1000);
        assert_eq!(envelope.data.result, serde_json::json!("done"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency_without_dropping_work() {
        let executor = MockExecutor::new(Duration::from_millis(50));
        let dispatcher = dispatcher(executor.clone(), 2);

        let mut receivers = Vec::new();
        for _ in 0..8 {
            receivers.push(
                dispatcher
                    .on_request(r#"{"language": "python", "code": "print(1)"}"#)
                    .await,
            );
        }
        for receiver in receivers {
            let envelope = receiver.await.unwrap();
            assert_eq!(envelope.code, 1000);
        }

        assert_eq!(executor.calls.load(Ordering::SeqCst), 8);
        assert!(executor.max_running.load(Ordering::SeqCst) <= 2);
    }
}

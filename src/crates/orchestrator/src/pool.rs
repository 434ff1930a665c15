//! Bounded worker pool
//!
//! Admission happens at submission time under a single lock: a request
//! whose id is already active, or that arrives while every slot is
//! occupied, is refused outright rather than queued. Each admitted request
//! runs on its own spawned task, and the slot is reclaimed when the worker
//! exits on any path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tokenwise_core::{AiRequest, CostTracker, ProviderResolver};

use crate::events::PoolEvent;
use crate::worker::{TaskOutcome, Worker};
use crate::ServiceError;

const EVENT_CAPACITY: usize = 256;

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub active: usize,
    pub max_workers: usize,
    pub utilization: f64,
    /// Requests that finished successfully since the pool was created
    pub completed_tasks: u64,
}

/// Completion handle for one admitted request
#[derive(Debug)]
pub struct TaskHandle {
    pub request_id: Uuid,
    outcome: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    /// Wait for the worker to reach a terminal outcome
    pub async fn outcome(self) -> TaskOutcome {
        self.outcome.await.unwrap_or(TaskOutcome::Cancelled)
    }
}

/// Bounded pool of single-request workers
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    max_workers: usize,
    slots: Mutex<HashMap<Uuid, CancellationToken>>,
    completed: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PoolInner {
                max_workers,
                slots: Mutex::new(HashMap::new()),
                completed: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Subscribe to pool events
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Admit a request and spawn its worker
    ///
    /// Refused when the id is already active or every slot is occupied.
    /// Refused work is never queued.
    pub fn submit(
        &self,
        request: AiRequest,
        resolver: Arc<dyn ProviderResolver>,
        cost_tracker: Option<Arc<dyn CostTracker>>,
    ) -> crate::Result<TaskHandle> {
        let request_id = request.id;
        let cancel = {
            let mut slots = self.inner.slots.lock();
            if slots.contains_key(&request_id) {
                warn!(%request_id, "request is already active");
                return Err(ServiceError::DuplicateRequest(request_id));
            }
            if slots.len() >= self.inner.max_workers {
                warn!(
                    %request_id,
                    active = slots.len(),
                    max_workers = self.inner.max_workers,
                    "pool saturated, refusing request"
                );
                return Err(ServiceError::PoolSaturated {
                    active: slots.len(),
                    max: self.inner.max_workers,
                });
            }
            let cancel = CancellationToken::new();
            slots.insert(request_id, cancel.clone());
            cancel
        };
        self.inner.emit_status();

        let worker = Worker::new(
            request,
            resolver,
            cost_tracker,
            cancel,
            self.inner.events.clone(),
        );
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = worker.run().await;
            inner.slots.lock().remove(&request_id);
            match &outcome {
                TaskOutcome::Completed(response) if response.success => {
                    inner.completed.fetch_add(1, Ordering::Relaxed);
                }
                TaskOutcome::Cancelled => {
                    let _ = inner.events.send(PoolEvent::WorkerCancelled { request_id });
                }
                TaskOutcome::Completed(_) => {}
            }
            inner.emit_status();
            let _ = tx.send(outcome);
        });

        debug!(%request_id, "request admitted");
        Ok(TaskHandle {
            request_id,
            outcome: rx,
        })
    }

    /// Flag a running request for cooperative cancellation
    ///
    /// Returns false when the id is not currently active. The slot is
    /// reclaimed once the worker observes the flag and exits.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        let slots = self.inner.slots.lock();
        match slots.get(&request_id) {
            Some(cancel) => {
                info!(%request_id, "cancelling active request");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything currently running
    pub fn cancel_all(&self) {
        let slots = self.inner.slots.lock();
        for cancel in slots.values() {
            cancel.cancel();
        }
    }

    /// Ids of currently active requests
    pub fn active_tasks(&self) -> Vec<Uuid> {
        self.inner.slots.lock().keys().copied().collect()
    }

    /// Current occupancy snapshot
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }
}

impl PoolInner {
    fn status(&self) -> PoolStatus {
        let active = self.slots.lock().len();
        PoolStatus {
            active,
            max_workers: self.max_workers,
            utilization: active as f64 / self.max_workers as f64,
            completed_tasks: self.completed.load(Ordering::Relaxed),
        }
    }

    fn emit_status(&self) {
        let status = self.status();
        let _ = self.events.send(PoolEvent::StatusChanged {
            active: status.active,
            max_workers: status.max_workers,
            utilization: status.utilization,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MockClient};
    use tokenwise_core::AiRequest;

    #[tokio::test]
    async fn capacity_is_enforced() {
        let client = MockClient::hang();
        let resolver = testing::resolver(&["openai"], &client);
        let pool = WorkerPool::new(2);

        let first = pool
            .submit(AiRequest::text_generation("a"), resolver.clone(), None)
            .unwrap();
        let second = pool
            .submit(AiRequest::text_generation("b"), resolver.clone(), None)
            .unwrap();

        let err = pool
            .submit(AiRequest::text_generation("c"), resolver.clone(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::PoolSaturated { active: 2, max: 2 }
        ));

        pool.cancel_all();
        assert!(matches!(first.outcome().await, TaskOutcome::Cancelled));
        assert!(matches!(second.outcome().await, TaskOutcome::Cancelled));
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let client = MockClient::hang();
        let resolver = testing::resolver(&["openai"], &client);
        let pool = WorkerPool::new(4);

        let request = AiRequest::text_generation("a");
        let request_id = request.id;
        let handle = pool.submit(request.clone(), resolver.clone(), None).unwrap();

        let err = pool.submit(request, resolver, None).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateRequest(id) if id == request_id));

        pool.cancel_all();
        handle.outcome().await;
    }

    #[tokio::test]
    async fn slots_are_reclaimed_after_completion() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let pool = WorkerPool::new(1);

        let handle = pool
            .submit(AiRequest::text_generation("a"), resolver.clone(), None)
            .unwrap();
        match handle.outcome().await {
            TaskOutcome::Completed(response) => assert!(response.success),
            TaskOutcome::Cancelled => panic!("unexpected cancellation"),
        }

        let status = pool.status();
        assert_eq!(status.active, 0);
        assert_eq!(status.completed_tasks, 1);

        // The freed slot admits the next request
        pool.submit(AiRequest::text_generation("b"), resolver, None)
            .unwrap();
    }

    #[tokio::test]
    async fn completed_counts_only_successes() {
        let ok_client = MockClient::succeed();
        let failing_client = MockClient::fail("boom");
        let pool = WorkerPool::new(4);

        let handle = pool
            .submit(
                AiRequest::text_generation("a"),
                testing::resolver(&["openai"], &ok_client),
                None,
            )
            .unwrap();
        handle.outcome().await;

        let handle = pool
            .submit(
                AiRequest::text_generation("b"),
                testing::resolver(&["openai"], &failing_client),
                None,
            )
            .unwrap();
        handle.outcome().await;

        assert_eq!(pool.status().completed_tasks, 1);
    }

    #[tokio::test]
    async fn cancel_flags_active_request() {
        let client = MockClient::hang();
        let resolver = testing::resolver(&["openai"], &client);
        let pool = WorkerPool::new(2);
        let mut events = pool.subscribe();

        let request = AiRequest::text_generation("a");
        let request_id = request.id;
        let handle = pool.submit(request, resolver, None).unwrap();

        assert!(pool.cancel(request_id));
        assert!(matches!(handle.outcome().await, TaskOutcome::Cancelled));
        assert_eq!(pool.status().active, 0);
        assert_eq!(pool.status().completed_tasks, 0);

        let seen = testing::drain(&mut events);
        assert!(seen
            .iter()
            .any(|event| matches!(event, PoolEvent::WorkerCancelled { request_id: id } if *id == request_id)));
    }

    #[tokio::test]
    async fn cancel_returns_false_for_unknown_ids() {
        let pool = WorkerPool::new(2);
        assert!(!pool.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn status_tracks_utilization() {
        let client = MockClient::hang();
        let resolver = testing::resolver(&["openai"], &client);
        let pool = WorkerPool::new(4);

        let handle = pool
            .submit(AiRequest::text_generation("a"), resolver, None)
            .unwrap();

        let status = pool.status();
        assert_eq!(status.active, 1);
        assert_eq!(status.max_workers, 4);
        assert_eq!(status.utilization, 0.25);
        assert_eq!(pool.active_tasks(), vec![handle.request_id]);

        pool.cancel_all();
        handle.outcome().await;
    }

    #[tokio::test]
    async fn admission_and_departure_emit_status() {
        let client = MockClient::succeed();
        let resolver = testing::resolver(&["openai"], &client);
        let pool = WorkerPool::new(2);
        let mut events = pool.subscribe();

        let handle = pool
            .submit(AiRequest::text_generation("a"), resolver, None)
            .unwrap();
        handle.outcome().await;

        let seen = testing::drain(&mut events);
        let occupancy: Vec<usize> = seen
            .iter()
            .filter_map(|event| match event {
                PoolEvent::StatusChanged { active, .. } => Some(*active),
                _ => None,
            })
            .collect();
        assert_eq!(occupancy, vec![1, 0]);
    }
}

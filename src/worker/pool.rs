//! Worker pool: a bounded set of workers pulling tasks from a shared queue.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ledger::TaskLedger;
use super::{Task, TaskExecutor};
use crate::error::{Error, Result};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{ExecutionOutcome, FailedTask, JobOutcome, TaskId, TaskState};

/// How [`WorkerPool::drain_and_wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Every submitted task reached a terminal state
    Drained,
    /// The cancellation signal fired first
    Cancelled,
}

/// State shared by the pool handle, its workers and backoff timers
struct PoolShared<E: TaskExecutor> {
    executor: Arc<E>,
    policy: RetryPolicy,
    queue_tx: mpsc::UnboundedSender<Task<E::Payload>>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Task<E::Payload>>>,
    /// Number of submitted tasks not yet terminal
    outstanding: watch::Sender<usize>,
    ledger: Mutex<TaskLedger>,
    /// External cancellation signal
    cancel: CancellationToken,
    /// Stops the workers; child of `cancel`
    stop: CancellationToken,
    next_id: AtomicU64,
}

/// Bounded pool of `W` workers executing tasks with one [`TaskExecutor`]
///
/// Workers are tokio tasks spawned at construction. Each one repeatedly pulls
/// a task from the shared queue and runs one attempt of it. Failed attempts are
/// retried according to the pool's [`RetryPolicy`]: the task is re-enqueued
/// after its backoff delay, which elapses on a detached timer so the worker is
/// free to pick up other tasks meanwhile. Errors and panics raised by the
/// executor are contained at this boundary and never take a worker down.
///
/// Tasks may start and finish in any order relative to submission.
pub struct WorkerPool<E: TaskExecutor> {
    shared: Arc<PoolShared<E>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl<E: TaskExecutor> WorkerPool<E> {
    /// Spawn a pool of `workers` workers (at least one) running `executor`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        executor: Arc<E>,
        workers: usize,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let worker_count = workers.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);
        let stop = cancel.child_token();

        let shared = Arc::new(PoolShared {
            executor,
            policy,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            outstanding,
            ledger: Mutex::new(TaskLedger::default()),
            cancel,
            stop,
            next_id: AtomicU64::new(0),
        });

        let handles = (0..worker_count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                tokio::spawn(worker_loop(shared, index))
            })
            .collect();

        tracing::debug!(workers = worker_count, "worker pool started");

        Self {
            shared,
            workers: Mutex::new(handles),
            worker_count,
        }
    }

    /// Number of workers in the pool
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueue a task for `payload`
    ///
    /// Fails with [`Error::Cancelled`] once the cancellation signal has fired.
    pub fn submit(&self, payload: E::Payload) -> Result<TaskId> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let label = self.shared.executor.describe(&payload);
        self.shared.ledger().insert(id, label);
        self.shared.outstanding.send_modify(|n| *n += 1);

        let task = Task {
            id,
            payload,
            attempts: 0,
        };
        if self.shared.queue_tx.send(task).is_err() {
            // The receiver lives in `shared`, so this only happens if the pool is torn down
            self.shared.finish_cancelled(id);
            return Err(Error::Other("worker pool queue is closed".to_string()));
        }
        Ok(id)
    }

    /// Block until every submitted task is terminal, or until cancellation
    pub async fn drain_and_wait(&self) -> DrainStatus {
        let mut outstanding = self.shared.outstanding.subscribe();
        tokio::select! {
            drained = outstanding.wait_for(|n| *n == 0) => {
                match drained {
                    Ok(_) => DrainStatus::Drained,
                    // The sender lives in `shared`; unreachable while `self` exists
                    Err(_) => DrainStatus::Cancelled,
                }
            }
            _ = self.shared.cancel.cancelled() => DrainStatus::Cancelled,
        }
    }

    /// Current state of a task
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.shared.ledger().state(id)
    }

    /// Tasks that have permanently failed so far
    pub fn failures(&self) -> Vec<FailedTask> {
        self.shared.ledger().failures()
    }

    /// Number of submitted tasks that have not reached a terminal state
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Stop the workers and aggregate task outcomes
    ///
    /// Workers finish the attempt they are running (an in-flight transfer is
    /// never aborted) and then exit. Tasks that never reached a terminal state
    /// (still queued, or backing off after cancellation) are reported as cancelled.
    pub async fn shutdown(&self) -> JobOutcome {
        self.shared.stop.cancel();

        let handles: Vec<_> = {
            let mut workers = self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            workers.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task terminated abnormally");
            }
        }

        let mut ledger = self.shared.ledger();
        let dropped = ledger.cancel_remaining();
        if dropped > 0 {
            tracing::warn!(tasks = dropped, "tasks cancelled before completion");
        }
        ledger.outcome()
    }
}

impl<E: TaskExecutor> Drop for WorkerPool<E> {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

async fn worker_loop<E: TaskExecutor>(shared: Arc<PoolShared<E>>, index: usize) {
    loop {
        let task = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            task = shared.next_task() => match task {
                Some(task) => task,
                None => break,
            },
        };
        shared.run_attempt(task).await;
    }
    tracing::trace!(worker = index, "worker exiting");
}

impl<E: TaskExecutor> PoolShared<E> {
    fn ledger(&self) -> std::sync::MutexGuard<'_, TaskLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn next_task(&self) -> Option<Task<E::Payload>> {
        self.queue_rx.lock().await.recv().await
    }

    async fn run_attempt(self: &Arc<Self>, mut task: Task<E::Payload>) {
        task.attempts += 1;
        self.ledger()
            .transition(task.id, TaskState::Running, task.attempts);

        let result = AssertUnwindSafe(self.executor.execute(&task.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::TaskPanicked(panic_message(panic.as_ref()))));

        match result {
            Ok(outcome) => self.finish_done(task.id, outcome),
            Err(error) => self.handle_failure(task, error),
        }
    }

    fn handle_failure(self: &Arc<Self>, task: Task<E::Payload>, error: Error) {
        let label = self.executor.describe(&task.payload);

        if self.cancel.is_cancelled() {
            tracing::warn!(task_id = %task.id, task = %label, error = %error, "attempt failed during cancellation, not retrying");
            self.finish_cancelled(task.id);
            return;
        }

        match self.policy.evaluate(task.attempts, &error) {
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    task_id = %task.id,
                    task = %label,
                    error = %error,
                    attempt = task.attempts,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "task failed, retrying"
                );
                {
                    let mut ledger = self.ledger();
                    ledger.record_error(task.id, error.to_string());
                    ledger.transition(task.id, TaskState::Retrying, task.attempts);
                }
                self.schedule_retry(task, delay);
            }
            RetryDecision::GiveUp => {
                tracing::error!(
                    task_id = %task.id,
                    task = %label,
                    error = %error,
                    attempts = task.attempts,
                    "task permanently failed"
                );
                if self.ledger().fail(task.id, error.to_string()) {
                    self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, task: Task<E::Payload>, delay: std::time::Duration) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let id = task.id;
                    shared.ledger().transition(id, TaskState::Pending, task.attempts);
                    if shared.queue_tx.send(task).is_err() {
                        shared.finish_cancelled(id);
                    }
                }
                _ = shared.cancel.cancelled() => {
                    tracing::debug!(task_id = %task.id, "retry abandoned on cancellation");
                    shared.finish_cancelled(task.id);
                }
            }
        });
    }

    fn finish_done(&self, id: TaskId, outcome: ExecutionOutcome) {
        if self.ledger().complete(id, outcome) {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    fn finish_cancelled(&self, id: TaskId) {
        if self.ledger().cancel(id) {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Scripted executor: payload is a name, behaviour looked up per name
    #[derive(Default)]
    struct ScriptedExecutor {
        /// name -> number of leading attempts that fail
        failures_before_success: HashMap<String, u32>,
        /// names that always fail
        always_fail: Vec<String>,
        /// names that panic
        panics: Vec<String>,
        delay: Duration,
        attempts: Mutex<HashMap<String, u32>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn attempts_for(&self, name: &str) -> u32 {
            *self.attempts.lock().unwrap().get(name).unwrap_or(&0)
        }
    }

    #[async_trait::async_trait]
    impl TaskExecutor for ScriptedExecutor {
        type Payload = String;

        async fn execute(&self, payload: &String) -> Result<ExecutionOutcome> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(payload.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panics.contains(payload) {
                panic!("executor exploded on {payload}");
            }
            if self.always_fail.contains(payload) {
                return Err(Error::UnexpectedStatus {
                    url: payload.clone(),
                    status: 404,
                });
            }
            match self.failures_before_success.get(payload) {
                Some(n) if attempt <= *n => Err(Error::Io(std::io::Error::other("flaky"))),
                _ => Ok(ExecutionOutcome::Transferred { bytes: 1 }),
            }
        }

        fn describe(&self, payload: &String) -> String {
            payload.clone()
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from(&RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        })
    }

    #[tokio::test]
    async fn all_tasks_complete_and_pool_drains() {
        let executor = Arc::new(ScriptedExecutor::default());
        let pool = WorkerPool::new(executor.clone(), 3, fast_policy(3), CancellationToken::new());

        for i in 0..10 {
            pool.submit(format!("file-{i}")).unwrap();
        }

        assert_eq!(pool.drain_and_wait().await, DrainStatus::Drained);
        let outcome = pool.shutdown().await;

        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.transferred, 10);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn parallelism_is_bounded_by_worker_count() {
        let executor = Arc::new(ScriptedExecutor {
            delay: Duration::from_millis(20),
            ..ScriptedExecutor::default()
        });
        let pool = WorkerPool::new(executor.clone(), 2, fast_policy(1), CancellationToken::new());

        for i in 0..8 {
            pool.submit(format!("file-{i}")).unwrap();
        }
        pool.drain_and_wait().await;
        pool.shutdown().await;

        assert!(executor.max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.worker_count(), 2);
    }

    #[tokio::test]
    async fn flaky_task_succeeds_after_retries() {
        let executor = Arc::new(ScriptedExecutor {
            failures_before_success: HashMap::from([("flaky".to_string(), 2)]),
            ..ScriptedExecutor::default()
        });
        let pool = WorkerPool::new(executor.clone(), 2, fast_policy(3), CancellationToken::new());

        let id = pool.submit("flaky".to_string()).unwrap();
        pool.drain_and_wait().await;

        assert_eq!(pool.task_state(id), Some(TaskState::Done));
        assert_eq!(executor.attempts_for("flaky"), 3);
        assert!(pool.shutdown().await.is_success());
    }

    #[tokio::test]
    async fn exhausted_task_fails_without_affecting_siblings() {
        let executor = Arc::new(ScriptedExecutor {
            always_fail: vec!["broken".to_string()],
            ..ScriptedExecutor::default()
        });
        let pool = WorkerPool::new(executor.clone(), 4, fast_policy(3), CancellationToken::new());

        for i in 0..5 {
            pool.submit(format!("ok-{i}")).unwrap();
        }
        let broken = pool.submit("broken".to_string()).unwrap();
        pool.drain_and_wait().await;
        let outcome = pool.shutdown().await;

        assert_eq!(executor.attempts_for("broken"), 3, "exactly K attempts");
        assert_eq!(outcome.transferred, 5);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].id, broken);
        assert_eq!(outcome.failed[0].attempts, 3);
        assert!(outcome.failed[0].error.contains("404"));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn panicking_executor_is_contained() {
        let executor = Arc::new(ScriptedExecutor {
            panics: vec!["bomb".to_string()],
            ..ScriptedExecutor::default()
        });
        let pool = WorkerPool::new(executor.clone(), 1, fast_policy(2), CancellationToken::new());

        pool.submit("bomb".to_string()).unwrap();
        pool.submit("after".to_string()).unwrap();
        pool.drain_and_wait().await;
        let outcome = pool.shutdown().await;

        assert_eq!(executor.attempts_for("bomb"), 2);
        assert_eq!(executor.attempts_for("after"), 1, "the single worker survived the panic");
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].error.contains("executor exploded on bomb"));
    }

    #[tokio::test]
    async fn cancellation_stops_new_pulls_and_reports_rest_as_cancelled() {
        let executor = Arc::new(ScriptedExecutor {
            delay: Duration::from_millis(100),
            ..ScriptedExecutor::default()
        });
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(executor.clone(), 1, fast_policy(1), cancel.clone());

        for i in 0..5 {
            pool.submit(format!("file-{i}")).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        assert_eq!(pool.drain_and_wait().await, DrainStatus::Cancelled);
        let outcome = pool.shutdown().await;

        assert_eq!(outcome.total, 5);
        assert_eq!(
            outcome.transferred, 1,
            "the in-flight attempt runs to completion"
        );
        assert_eq!(outcome.cancelled.len(), 4);
        assert_eq!(executor.attempts.lock().unwrap().len(), 1, "no new pulls after cancel");
        assert!(matches!(pool.submit("late".into()), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_cancels_the_retry() {
        let executor = Arc::new(ScriptedExecutor {
            always_fail: vec!["broken".to_string()],
            ..ScriptedExecutor::default()
        });
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            jitter: false,
        });
        let pool = WorkerPool::new(executor.clone(), 1, policy, cancel.clone());

        let id = pool.submit("broken".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.task_state(id), Some(TaskState::Retrying));

        cancel.cancel();
        pool.drain_and_wait().await;
        let outcome = pool.shutdown().await;

        assert_eq!(outcome.cancelled, vec![id]);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn empty_pool_drains_immediately() {
        let pool = WorkerPool::new(
            Arc::new(ScriptedExecutor::default()),
            2,
            fast_policy(1),
            CancellationToken::new(),
        );

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.drain_and_wait().await, DrainStatus::Drained);
        assert_eq!(pool.shutdown().await, JobOutcome::default());
    }
}

//! Task Queue: a priority-ordered, single-executor FIFO with bounded history.
//!
//! The executor loop is grounded in the teacher's `sessions::buffer` use of
//! `tokio::sync::Notify` to wake a waiting reader without polling: enqueue,
//! resume, and pause-lift all call `notify_one`, and the loop parks on
//! `notified()` whenever there is nothing runnable. Locking discipline
//! mirrors the rest of the crate — a single `Mutex<QueueState>`, with the
//! slow part (actually running a task against the session pool) executed
//! outside the lock and the terminal-state write taking a second, short
//! critical section.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::Error;
use crate::events::{DomainEvent, EventBus};
use crate::pool::session::SessionFactory;
use crate::pool::SessionPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    fn band_index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    pub prompt: String,
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolset: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Whether to run against the shared [`SessionPool`] or a throwaway
    /// session created directly from the factory. Direct sessions are
    /// always destroyed after one use; they are never pooled or reused.
    #[serde(default = "default_use_pool")]
    pub use_pool: bool,
}

fn default_use_pool() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            model: None,
            working_directory: None,
            toolset: None,
            timeout_ms: None,
            use_pool: true,
        }
    }
}

/// Caller-supplied shape for `enqueue`; the queue assigns `id`, `createdAt`
/// and the initial `queued` status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub priority: Priority,
    pub payload: TaskPayload,
    #[serde(default)]
    pub config: TaskConfig,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: Priority,
    pub payload: TaskPayload,
    pub config: TaskConfig,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub is_paused: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queued: Vec<PooledTask>,
    pub running: Option<PooledTask>,
    pub stats: QueueStats,
}

struct RunningTask {
    task: PooledTask,
    cancel: CancellationToken,
}

struct QueueState {
    bands: [Vec<PooledTask>; 3],
    running: Option<RunningTask>,
    history: VecDeque<PooledTask>,
    is_paused: bool,
}

impl QueueState {
    fn queued_len(&self) -> usize {
        self.bands.iter().map(Vec::len).sum()
    }

    fn find_queued(&self, id: &str) -> Option<(usize, usize)> {
        for (band_idx, band) in self.bands.iter().enumerate() {
            if let Some(pos) = band.iter().position(|t| t.id == id) {
                return Some((band_idx, pos));
            }
        }
        None
    }

    fn pop_highest_band(&mut self) -> Option<PooledTask> {
        for band in &mut self.bands {
            if !band.is_empty() {
                return Some(band.remove(0));
            }
        }
        None
    }

    fn push_history(&mut self, task: PooledTask, cap: usize) {
        self.history.push_back(task);
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    fn stats(&self) -> QueueStats {
        let mut completed = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        for t in &self.history {
            match t.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        let running = usize::from(self.running.is_some());
        let queued = self.queued_len();
        QueueStats {
            queued,
            running,
            completed,
            failed,
            cancelled,
            total: queued + running + completed + failed + cancelled,
            is_paused: self.is_paused,
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        let queued = self.bands.iter().flatten().cloned().collect();
        QueueSnapshot {
            queued,
            running: self.running.as_ref().map(|r| r.task.clone()),
            stats: self.stats(),
        }
    }
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    bus: EventBus,
    pool: SessionPool,
    factory: Arc<dyn SessionFactory>,
}

/// Cloneable handle onto the task queue. The executor loop runs on whichever
/// task calls [`TaskQueue::spawn_executor`] — the queue itself never spawns
/// on construction, mirroring the teacher's habit of wiring background tasks
/// explicitly in `main` rather than hiding them in a constructor.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

const DEFAULT_TASK_TIMEOUT_MS: u64 = 120_000;

impl TaskQueue {
    pub fn new(
        config: QueueConfig,
        bus: EventBus,
        pool: SessionPool,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState {
                    bands: [Vec::new(), Vec::new(), Vec::new()],
                    running: None,
                    history: VecDeque::new(),
                    is_paused: false,
                }),
                notify: Notify::new(),
                bus,
                pool,
                factory,
            }),
        }
    }

    pub fn spawn_executor(&self) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(executor_loop(inner))
    }

    pub async fn enqueue(&self, input: TaskInput) -> PooledTask {
        let task = PooledTask {
            id: Uuid::new_v4().to_string(),
            kind: input.kind,
            priority: input.priority,
            payload: input.payload,
            config: input.config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: TaskStatus::Queued,
            display_name: input.display_name.unwrap_or_default(),
            error: None,
            result: None,
        };

        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let band = task.priority.band_index();
            state.bands[band].push(task.clone());
            state.snapshot()
        };
        self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
        self.inner.notify.notify_one();
        task
    }

    pub async fn pause(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.is_paused = true;
            state.snapshot()
        };
        self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
    }

    pub async fn resume(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.is_paused = false;
            state.snapshot()
        };
        self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
        self.inner.notify.notify_one();
    }

    /// Cancel a task by id. Queued tasks are removed and marked cancelled
    /// immediately; a running task is signalled and resolves asynchronously
    /// once the executor observes the cancellation. Already-terminal tasks
    /// are a no-op. Returns `NotFound` only if the id is unknown entirely.
    pub async fn cancel(&self, task_id: &str) -> Result<(), Error> {
        enum Action {
            RemovedFromQueue(PooledTask),
            SignalledRunning,
            AlreadyTerminal,
        }

        let action = {
            let mut state = self.inner.state.lock().await;
            if let Some((band, idx)) = state.find_queued(task_id) {
                Action::RemovedFromQueue(state.bands[band].remove(idx))
            } else if state.running.as_ref().map(|r| r.task.id.as_str()) == Some(task_id) {
                state.running.as_ref().unwrap().cancel.cancel();
                Action::SignalledRunning
            } else if state.history.iter().any(|t| t.id == task_id) {
                Action::AlreadyTerminal
            } else {
                return Err(Error::NotFound("task not found".to_string()));
            }
        };

        if let Action::RemovedFromQueue(mut task) = action {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            let snapshot = {
                let mut state = self.inner.state.lock().await;
                state.push_history(task.clone(), self.inner.config.history_size);
                state.snapshot()
            };
            self.inner.bus.publish(DomainEvent::TaskCancelled { task });
            self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
        }
        Ok(())
    }

    pub async fn move_to_top(&self, task_id: &str) -> Result<(), Error> {
        self.reorder(task_id, |band, idx| {
            let task = band.remove(idx);
            band.insert(0, task);
        })
        .await
    }

    pub async fn move_up(&self, task_id: &str) -> Result<(), Error> {
        self.reorder(task_id, |band, idx| {
            if idx > 0 {
                band.swap(idx, idx - 1);
            }
        })
        .await
    }

    pub async fn move_down(&self, task_id: &str) -> Result<(), Error> {
        self.reorder(task_id, |band, idx| {
            if idx + 1 < band.len() {
                band.swap(idx, idx + 1);
            }
        })
        .await
    }

    async fn reorder(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut Vec<PooledTask>, usize),
    ) -> Result<(), Error> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            match state.find_queued(task_id) {
                Some((band, idx)) => {
                    f(&mut state.bands[band], idx);
                    Some(state.snapshot())
                }
                None => {
                    let known_elsewhere = state.running.as_ref().map(|r| r.task.id.as_str()) == Some(task_id)
                        || state.history.iter().any(|t| t.id == task_id);
                    if known_elsewhere {
                        None // not in queued state: ignore silently
                    } else {
                        return Err(Error::NotFound("task not found".to_string()));
                    }
                }
            }
        };
        if let Some(snapshot) = snapshot {
            self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
        }
        Ok(())
    }

    pub async fn clear_queued(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            for band in &mut state.bands {
                band.clear();
            }
            state.snapshot()
        };
        self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
    }

    pub async fn clear_history(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.history.clear();
            state.snapshot()
        };
        self.inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Most-recently-terminated task first.
    pub async fn history(&self) -> Vec<PooledTask> {
        self.inner.state.lock().await.history.iter().rev().cloned().collect()
    }
}

async fn executor_loop(inner: Arc<QueueInner>) {
    loop {
        let popped = {
            let mut state = inner.state.lock().await;
            if state.is_paused || state.running.is_some() {
                None
            } else {
                state.pop_highest_band()
            }
        };

        let Some(mut task) = popped else {
            inner.notify.notified().await;
            continue;
        };

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let cancel = CancellationToken::new();
        let snapshot = {
            let mut state = inner.state.lock().await;
            state.running = Some(RunningTask {
                task: task.clone(),
                cancel: cancel.clone(),
            });
            state.snapshot()
        };
        inner.bus.publish(DomainEvent::QueueUpdated { snapshot });

        let outcome = run_task(&inner, &task, cancel).await;

        let mut finished = task.clone();
        finished.completed_at = Some(Utc::now());
        match outcome {
            Ok(result) => {
                finished.status = TaskStatus::Completed;
                finished.result = Some(result);
            }
            Err(Error::Cancelled) => {
                finished.status = TaskStatus::Cancelled;
                finished.error = Some("cancelled".to_string());
            }
            Err(e) => {
                finished.status = TaskStatus::Failed;
                finished.error = Some(e.to_string());
            }
        }

        let snapshot = {
            let mut state = inner.state.lock().await;
            state.running = None;
            state.push_history(finished.clone(), inner.config.history_size);
            state.snapshot()
        };

        match finished.status {
            TaskStatus::Completed => inner
                .bus
                .publish(DomainEvent::TaskCompleted { task: finished.clone() }),
            TaskStatus::Failed => inner
                .bus
                .publish(DomainEvent::TaskFailed { task: finished.clone() }),
            TaskStatus::Cancelled => inner
                .bus
                .publish(DomainEvent::TaskCancelled { task: finished.clone() }),
            _ => unreachable!("a just-finished task is always terminal"),
        }
        inner.bus.publish(DomainEvent::QueueUpdated { snapshot });
    }
}

async fn run_task(
    inner: &QueueInner,
    task: &PooledTask,
    cancel: CancellationToken,
) -> Result<serde_json::Value, Error> {
    let timeout = Duration::from_millis(task.config.timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS));

    if task.config.use_pool {
        let mut handle = inner.pool.acquire_default().await?;
        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, handle.send_and_wait(task.payload.prompt.clone())) => match res {
                Ok(Ok(text)) => Ok(serde_json::json!({ "response": text })),
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Err(Error::Timeout),
            },
            () = cancel.cancelled() => Err(Error::Cancelled),
        };
        if outcome.is_ok() {
            handle.release().await;
        } else {
            handle.destroy().await;
        }
        outcome
    } else {
        let mut session = inner.factory.create().await?;
        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, session.send_and_wait(task.payload.prompt.clone())) => match res {
                Ok(Ok(text)) => Ok(serde_json::json!({ "response": text })),
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Err(Error::Timeout),
            },
            () = cancel.cancelled() => Err(Error::Cancelled),
        };
        session.destroy().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::session::AiSession;

    struct SlowSession {
        delay_ms: u64,
    }

    impl AiSession for SlowSession {
        fn send_and_wait(&mut self, prompt: String) -> BoxFuture<'_, Result<String, Error>> {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(format!("echo: {prompt}"))
            })
        }

        fn destroy(self: Box<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    struct SlowFactory {
        delay_ms: u64,
        created: AtomicUsize,
    }

    impl SessionFactory for SlowFactory {
        fn create(&self) -> BoxFuture<'static, Result<Box<dyn AiSession>, Error>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let delay_ms = self.delay_ms;
            Box::pin(async move { Ok(Box::new(SlowSession { delay_ms }) as Box<dyn AiSession>) })
        }
    }

    fn test_queue(delay_ms: u64, history_size: usize) -> TaskQueue {
        let factory = Arc::new(SlowFactory {
            delay_ms,
            created: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(
            factory.clone(),
            PoolConfig {
                max_sessions: 2,
                min_sessions: 0,
                idle_timeout_ms: 60_000,
                cleanup_interval_ms: 60_000,
                default_acquire_timeout_ms: 1_000,
            },
        );
        TaskQueue::new(
            QueueConfig { history_size },
            EventBus::new(),
            pool,
            factory,
        )
    }

    fn input(kind: &str, priority: Priority) -> TaskInput {
        TaskInput {
            kind: kind.to_string(),
            priority,
            payload: TaskPayload {
                prompt: "do the thing".to_string(),
                extra: serde_json::Value::Null,
            },
            config: TaskConfig::default(),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn priority_then_insertion_order_is_preserved() {
        let queue = test_queue(10, 100);
        queue.enqueue(input("a", Priority::Normal)).await;
        queue.enqueue(input("b", Priority::Low)).await;
        queue.enqueue(input("c", Priority::High)).await;

        let snapshot = queue.snapshot().await;
        let order: Vec<&str> = snapshot.queued.iter().map(|t| t.kind.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn executor_runs_tasks_to_completion() {
        let queue = test_queue(5, 100);
        queue.spawn_executor();
        let task = queue.enqueue(input("a", Priority::Normal)).await;

        for _ in 0..50 {
            if queue.history().await.iter().any(|t| t.id == task.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let history = queue.history().await;
        let finished = history.iter().find(|t| t.id == task.id).expect("task finished");
        assert_eq!(finished.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn pause_stops_dequeue_until_resumed() {
        let queue = test_queue(5, 100);
        queue.pause().await;
        queue.spawn_executor();
        let task = queue.enqueue(input("a", Priority::Normal)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.snapshot().await.queued.len(), 1, "still queued while paused");

        queue.resume().await;
        for _ in 0..50 {
            if queue.history().await.iter().any(|t| t.id == task.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(queue.history().await.iter().any(|t| t.id == task.id));
    }

    #[tokio::test]
    async fn cancel_queued_task_marks_it_cancelled_in_history() {
        let queue = test_queue(10, 100);
        let task = queue.enqueue(input("a", Priority::Normal)).await;
        queue.cancel(&task.id).await.unwrap();

        let history = queue.history().await;
        let found = history.iter().find(|t| t.id == task.id).unwrap();
        assert_eq!(found.status, TaskStatus::Cancelled);
        assert_eq!(queue.snapshot().await.queued.len(), 0);
    }

    #[tokio::test]
    async fn cancel_running_task_resolves_cancelled() {
        let queue = test_queue(5_000, 100);
        queue.spawn_executor();
        let task = queue.enqueue(input("a", Priority::Normal)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.cancel(&task.id).await.unwrap();

        for _ in 0..100 {
            if queue.history().await.iter().any(|t| t.id == task.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let history = queue.history().await;
        let found = history.iter().find(|t| t.id == task.id).expect("task finished");
        assert_eq!(found.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let queue = test_queue(10, 100);
        let err = queue.cancel("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn move_to_top_reorders_within_band_only() {
        let queue = test_queue(10, 100);
        queue.enqueue(input("a", Priority::Normal)).await;
        let b = queue.enqueue(input("b", Priority::Normal)).await;
        queue.enqueue(input("c", Priority::Normal)).await;

        queue.move_to_top(&b.id).await.unwrap();
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.queued[0].id, b.id);
    }

    #[tokio::test]
    async fn history_ring_evicts_oldest_first() {
        let queue = test_queue(1, 2);
        for i in 0..3 {
            let task = queue.enqueue(input(&format!("t{i}"), Priority::Normal)).await;
            queue.cancel(&task.id).await.unwrap();
        }
        let history = queue.history().await;
        assert_eq!(history.len(), 2);
        assert!(!history.iter().any(|t| t.kind == "t0"), "oldest entry evicted");
    }
}

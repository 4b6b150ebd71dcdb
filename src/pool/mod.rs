//! Bounded pool of reusable AI sessions.
//!
//! Mirrors the shape of the teacher's `SessionManager` (`sessions/mod.rs`):
//! a single lock guarding a small bookkeeping struct, with slow operations
//! (session creation, destruction) executed outside the critical section.
//! Unlike `SessionManager` — which hands shell sessions straight to whoever
//! asks, because creation never blocks on anything but `fork`/`exec` — this
//! pool must make waiting callers queue fairly, because session creation is
//! a potentially slow call into an LLM backend.
//!
//! FIFO fairness is implemented with a `VecDeque` of one-shot channels: a
//! waiter registers a sender in the queue and awaits its receiver under a
//! timeout. `release` pops the head sender and tries to send the freed
//! session through it; if that send fails (the waiter already timed out and
//! dropped its receiver) `release` tries the next one, and so on, falling
//! back to the idle queue once no live waiter remains. Because the timed-out
//! receiver side is *moved into* `tokio::time::timeout` and dropped when the
//! timeout elapses, a `send` against it fails immediately and deterministically
//! — there is no window where both the timeout and a concurrent release could
//! each believe they won.

pub mod session;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::Error;
use session::{AiSession, SessionFactory};

/// An idle session sitting in the pool, or one freshly created for a caller.
struct PooledSession {
    session_id: String,
    created_at: Instant,
    last_used_at: Instant,
    transport: Box<dyn AiSession>,
}

struct PoolState {
    idle: VecDeque<PooledSession>,
    in_use_count: usize,
    waiters: VecDeque<oneshot::Sender<Result<PooledSession, Error>>>,
    disposed: bool,
}

/// Point-in-time pool counters, exposed for `/api/stats`-style diagnostics.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub waiters: usize,
    pub disposed: bool,
}

/// Bounded, cloneable handle onto a pool of AI sessions.
#[derive(Clone)]
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            state: Arc::new(Mutex::new(PoolState {
                idle: VecDeque::new(),
                in_use_count: 0,
                waiters: VecDeque::new(),
                disposed: false,
            })),
        }
    }

    /// Acquire a session, waiting up to `timeout` if none is immediately
    /// available and the pool is at capacity.
    ///
    /// Fails with [`Error::PoolDisposed`] if the pool has been disposed, or
    /// [`Error::Timeout`] if `timeout` elapses first.
    pub async fn acquire(&self, timeout: Duration) -> Result<SessionHandle, Error> {
        let immediate = self.try_take_or_reserve().await?;
        let pooled = match immediate {
            TakeResult::Session(s) => s,
            TakeResult::ReservedSlot => match self.create_session().await {
                Ok(s) => s,
                Err(e) => {
                    self.release_reserved_slot().await;
                    return Err(e);
                }
            },
            TakeResult::MustWait => {
                let (tx, rx) = oneshot::channel();
                {
                    let mut state = self.state.lock().await;
                    state.waiters.push_back(tx);
                }
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(Ok(session))) => session,
                    Ok(Ok(Err(e))) => return Err(e),
                    Ok(Err(_recv_dropped)) => return Err(Error::Internal(
                        "pool waiter channel dropped without resolution".to_string(),
                    )),
                    Err(_elapsed) => return Err(Error::Timeout),
                }
            }
        };

        Ok(SessionHandle {
            pool: self.clone(),
            session: Some(pooled),
        })
    }

    /// Acquire using the pool's configured default timeout.
    pub async fn acquire_default(&self) -> Result<SessionHandle, Error> {
        self.acquire(Duration::from_millis(self.config.default_acquire_timeout_ms))
            .await
    }

    async fn try_take_or_reserve(&self) -> Result<TakeResult, Error> {
        let mut state = self.state.lock().await;
        if state.disposed {
            return Err(Error::PoolDisposed);
        }
        if let Some(session) = state.idle.pop_front() {
            state.in_use_count += 1;
            return Ok(TakeResult::Session(session));
        }
        let total = state.idle.len() + state.in_use_count;
        if total < self.config.max_sessions {
            state.in_use_count += 1; // reserve the slot before releasing the lock
            return Ok(TakeResult::ReservedSlot);
        }
        Ok(TakeResult::MustWait)
    }

    async fn release_reserved_slot(&self) {
        let mut state = self.state.lock().await;
        state.in_use_count = state.in_use_count.saturating_sub(1);
        drop(state);
        self.wake_next_waiter_with_new_slot().await;
    }

    /// A slot just freed up (creation failed, or a destroyed session was not
    /// replaced) — give a waiting caller the chance to create a session of
    /// their own rather than sitting idle until the next `release`.
    async fn wake_next_waiter_with_new_slot(&self) {
        let waiter = {
            let mut state = self.state.lock().await;
            state.waiters.pop_front()
        };
        let Some(tx) = waiter else { return };
        // Reserve the slot this waiter is about to consume up front, so a
        // concurrent acquire() cannot also claim it while we're creating.
        {
            let mut state = self.state.lock().await;
            state.in_use_count += 1;
        }
        match self.create_session().await {
            Ok(session) => {
                if let Err(Ok(session)) = tx.send(Ok(session)) {
                    // Waiter already timed out; the session is unused, put
                    // it back on the idle queue instead of discarding it.
                    let mut state = self.state.lock().await;
                    state.in_use_count = state.in_use_count.saturating_sub(1);
                    state.idle.push_back(session);
                }
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.in_use_count = state.in_use_count.saturating_sub(1);
                drop(state);
                let _ = tx.send(Err(e));
            }
        }
    }

    async fn create_session(&self) -> Result<PooledSession, Error> {
        let transport = self.factory.create().await?;
        let now = Instant::now();
        Ok(PooledSession {
            session_id: Uuid::new_v4().to_string(),
            created_at: now,
            last_used_at: now,
            transport,
        })
    }

    /// Return a session to the pool. If waiters exist, hands it directly to
    /// the head waiter (FIFO); otherwise marks it idle.
    ///
    /// A session that is not currently accounted for as "in use" (e.g. a
    /// double release) is a no-op beyond the idle/waiter bookkeeping — callers
    /// cannot forge a `SessionHandle`, so this can only happen via `Drop`
    /// racing an explicit `release`, which `SessionHandle` already guards
    /// against with an `Option`.
    async fn release(&self, mut session: PooledSession) {
        session.last_used_at = Instant::now();
        loop {
            let waiter = {
                let mut state = self.state.lock().await;
                if state.disposed {
                    None
                } else {
                    state.waiters.pop_front()
                }
            };
            let Some(tx) = waiter else { break };
            match tx.send(Ok(session)) {
                Ok(()) => return, // handed off directly, in_use_count stays the same
                Err(Ok(returned)) => session = returned, // waiter already timed out; try next
                Err(Err(_)) => unreachable!("release never sends Err"),
            }
        }

        let mut state = self.state.lock().await;
        state.in_use_count = state.in_use_count.saturating_sub(1);
        if state.disposed {
            drop(state);
            session.transport.destroy().await;
        } else {
            state.idle.push_back(session);
        }
    }

    /// Destroy a session outright rather than returning it to the idle set.
    async fn destroy(&self, session: PooledSession) {
        {
            let mut state = self.state.lock().await;
            state.in_use_count = state.in_use_count.saturating_sub(1);
        }
        session.transport.destroy().await;
        self.wake_next_waiter_with_new_slot().await;
    }

    /// Evict idle sessions that have exceeded `idle_timeout_ms`, never
    /// dropping the idle count below `min_sessions`.
    pub async fn cleanup_idle_sessions(&self) {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let to_destroy = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return;
            }
            let keep_at_least = self.config.min_sessions;
            let mut kept = VecDeque::new();
            let mut evicted = Vec::new();
            while let Some(session) = state.idle.pop_front() {
                let would_keep = kept.len() + (state.idle.len() + 1) <= keep_at_least;
                if !would_keep && session.last_used_at.elapsed() > idle_timeout {
                    evicted.push(session);
                } else {
                    kept.push_back(session);
                }
            }
            state.idle = kept;
            evicted
        };
        for session in to_destroy {
            info!(session_id = %session.session_id, "evicting idle session");
            session.transport.destroy().await;
        }
    }

    /// Reject all waiters with `PoolDisposed`, then destroy every session
    /// concurrently. Idempotent.
    pub async fn dispose(&self) {
        let (waiters, idle): (
            VecDeque<oneshot::Sender<Result<PooledSession, Error>>>,
            VecDeque<PooledSession>,
        ) = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return;
            }
            state.disposed = true;
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.idle),
            )
        };

        for tx in waiters {
            let _ = tx.send(Err(Error::PoolDisposed));
        }

        let destroys = idle.into_iter().map(|s| async move {
            s.transport.destroy().await;
        });
        futures::future::join_all(destroys).await;
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use_count,
            waiters: state.waiters.len(),
            disposed: state.disposed,
        }
    }
}

enum TakeResult {
    Session(PooledSession),
    ReservedSlot,
    MustWait,
}

/// RAII handle onto a checked-out session.
///
/// Dropping the handle without calling [`release`](Self::release) or
/// [`destroy`](Self::destroy) returns the session to the pool as a safety
/// net (spawned onto the runtime, since `Drop` cannot be async).
pub struct SessionHandle {
    pool: SessionPool,
    session: Option<PooledSession>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.session.as_ref().expect("session handle in use").session_id
    }

    pub async fn send_and_wait(&mut self, prompt: String) -> Result<String, Error> {
        let session = self.session.as_mut().expect("session handle in use");
        session.transport.send_and_wait(prompt).await
    }

    /// Return the session to the pool.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session).await;
        }
    }

    /// Destroy the session rather than returning it to the pool.
    pub async fn destroy(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.destroy(session).await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(session).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;

    struct FakeSession;

    impl AiSession for FakeSession {
        fn send_and_wait(&mut self, prompt: String) -> BoxFuture<'_, Result<String, Error>> {
            Box::pin(async move { Ok(format!("echo: {prompt}")) })
        }

        fn destroy(self: Box<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    struct FakeFactory {
        created: AtomicUsize,
    }

    impl SessionFactory for FakeFactory {
        fn create(&self) -> BoxFuture<'static, Result<Box<dyn AiSession>, Error>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Box::new(FakeSession) as Box<dyn AiSession>) })
        }
    }

    fn test_config(max_sessions: usize) -> PoolConfig {
        PoolConfig {
            max_sessions,
            min_sessions: 0,
            idle_timeout_ms: 60_000,
            cleanup_interval_ms: 60_000,
            default_acquire_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn acquire_creates_up_to_max_then_reuses_idle() {
        let factory = Arc::new(FakeFactory {
            created: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(factory.clone(), test_config(2));

        let h1 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let h2 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        h1.release().await;
        let h3 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2, "should reuse the idle session");

        h2.release().await;
        h3.release().await;
    }

    #[tokio::test]
    async fn acquire_times_out_when_pool_is_exhausted() {
        let factory = Arc::new(FakeFactory {
            created: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(factory, test_config(1));

        let _h1 = pool.acquire(Duration::from_millis(200)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn waiter_is_handed_the_session_directly_on_release() {
        let factory = Arc::new(FakeFactory {
            created: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(factory.clone(), test_config(1));

        let h1 = pool.acquire(Duration::from_millis(500)).await.unwrap();
        let waiting_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiting_pool.acquire(Duration::from_millis(500)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        h1.release().await;

        let h2 = waiter.await.unwrap().unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1, "the waiter reused h1's session");
        h2.release().await;
    }

    #[tokio::test]
    async fn dispose_rejects_further_acquires_and_is_idempotent() {
        let factory = Arc::new(FakeFactory {
            created: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(factory, test_config(2));

        let h1 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        h1.release().await;

        pool.dispose().await;
        pool.dispose().await; // idempotent

        let err = pool.acquire(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, Error::PoolDisposed));
    }

    #[tokio::test]
    async fn cleanup_never_evicts_below_min_sessions() {
        let factory = Arc::new(FakeFactory {
            created: AtomicUsize::new(0),
        });
        let mut cfg = test_config(3);
        cfg.min_sessions = 1;
        cfg.idle_timeout_ms = 0;
        let pool = SessionPool::new(factory, cfg);

        let h1 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let h2 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        h1.release().await;
        h2.release().await;

        pool.cleanup_idle_sessions().await;
        let stats = pool.stats().await;
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn destroy_frees_a_slot_for_a_new_session() {
        let factory = Arc::new(FakeFactory {
            created: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(factory.clone(), test_config(1));

        let h1 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        h1.destroy().await;
        assert_eq!(pool.stats().await.idle, 0);

        let h2 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        h2.release().await;
    }
}

//! Pool of pre-provisioned, single-use sandboxes.
//!
//! The pool keeps `capacity` sandboxes warm so a request only pays for
//! running its code, never for starting a container. Every sandbox handed
//! out by [`SandboxPool::acquire`] is used once: when its [`Lease`] drops,
//! the sandbox is retired and a replacement is provisioned, both in the
//! background.
//!
//! # Architecture
//!
//! Ready sandboxes live in a `VecDeque` behind a mutex. A semaphore carries
//! one permit per queued sandbox; tokio semaphores serve waiters in FIFO
//! order, which gives acquirers first-come-first-served fairness and
//! backpressure when the pool runs dry. Closing the semaphore on shutdown
//! wakes every waiter.
//!
//! Retire, replenish and fill tasks are spawned on a [`TaskTracker`] so
//! shutdown can wait for them (up to a grace period) instead of leaking them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use webcompile_core::{DockerRuntime, PoolConfig, SandboxPool};
//!
//! let pool = SandboxPool::new(Arc::new(DockerRuntime::default()), PoolConfig::default());
//! pool.fill().await;
//!
//! let lease = pool.acquire().await?;
//! println!("running in {}", lease.id());
//! drop(lease); // retire + replenish in the background
//!
//! pool.shutdown().await;
//! ```

use crate::config::PoolConfig;
use crate::error::CoreError;
use crate::runtime::{Mount, SandboxRuntime};
use crate::sandbox::{Sandbox, SandboxId, SandboxState};
use crate::workspace::WorkspaceAllocator;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::task::TaskTracker;

// ============================================================================
// Statistics
// ============================================================================

/// Pool statistics for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Sandboxes successfully provisioned.
    pub created: AtomicU64,
    /// Sandboxes retired.
    pub destroyed: AtomicU64,
    /// Sandboxes handed out by `acquire()`.
    pub acquired: AtomicU64,
    /// Provisioning requests that failed after all attempts.
    pub provision_failures: AtomicU64,
    /// Retirements where the runtime failed to remove the sandbox.
    pub teardown_failures: AtomicU64,
    /// Executions that ran a command.
    pub executions: AtomicU64,
    /// Executions killed by the deadline.
    pub timeouts: AtomicU64,
}

impl PoolStats {
    /// Count one finished execution.
    pub fn record_execution(&self, timed_out: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get the number of sandboxes created.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Get the number of sandboxes destroyed.
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    /// Get the number of acquisitions.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Get the number of failed provisioning requests.
    pub fn provision_failures(&self) -> u64 {
        self.provision_failures.load(Ordering::Relaxed)
    }

    /// Get the number of failed teardowns.
    pub fn teardown_failures(&self) -> u64 {
        self.teardown_failures.load(Ordering::Relaxed)
    }

    /// Get the number of executions.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Get the number of timed-out executions.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of the pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub ready: usize,
    pub background_tasks: usize,
    pub created: u64,
    pub destroyed: u64,
    pub acquired: u64,
    pub provision_failures: u64,
    pub teardown_failures: u64,
    pub executions: u64,
    pub timeouts: u64,
}

// ============================================================================
// Pool Implementation
// ============================================================================

struct PoolInner {
    runtime: Arc<dyn SandboxRuntime>,
    allocator: WorkspaceAllocator,
    config: PoolConfig,
    /// Ready sandboxes, oldest first.
    ready: Mutex<VecDeque<Sandbox>>,
    /// One permit per sandbox in `ready`.
    available: Semaphore,
    /// Set once by `shutdown()`; no enqueue succeeds afterwards.
    closed: AtomicBool,
    tasks: TaskTracker,
    stats: PoolStats,
}

/// Bounded pool of ready sandboxes shared by all request tasks.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<PoolInner>,
}

impl SandboxPool {
    /// Create an empty pool.
    ///
    /// Nothing is provisioned until [`fill()`](Self::fill) or
    /// [`spawn_fill()`](Self::spawn_fill) runs.
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: PoolConfig) -> Self {
        tracing::info!(
            capacity = config.capacity,
            image = %config.image,
            runtime = runtime.name(),
            storage_root = %config.storage_root.display(),
            "Creating sandbox pool"
        );

        Self {
            inner: Arc::new(PoolInner {
                allocator: WorkspaceAllocator::new(&config.storage_root),
                ready: Mutex::new(VecDeque::with_capacity(config.capacity)),
                available: Semaphore::new(0),
                closed: AtomicBool::new(false),
                tasks: TaskTracker::new(),
                stats: PoolStats::default(),
                runtime,
                config,
            }),
        }
    }

    /// Provision `capacity` sandboxes concurrently and enqueue each as it
    /// becomes ready.
    ///
    /// Failures are logged and leave the pool short; they never abort the
    /// fill. Returns the number of sandboxes enqueued.
    pub async fn fill(&self) -> usize {
        let capacity = self.inner.config.capacity;
        let start = Instant::now();
        tracing::info!(capacity, "Filling sandbox pool");

        let results = futures::future::join_all((0..capacity).map(|_| self.replenish())).await;
        let ready = results.into_iter().filter(|ok| *ok).count();

        if ready < capacity {
            tracing::warn!(
                ready,
                capacity,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Sandbox pool filled below capacity"
            );
        } else {
            tracing::info!(
                ready,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Sandbox pool filled"
            );
        }
        ready
    }

    /// Run [`fill()`](Self::fill) as a tracked background task.
    pub fn spawn_fill(&self) {
        let pool = self.clone();
        self.spawn_tracked(async move {
            pool.fill().await;
        });
    }

    /// Wait for a ready sandbox and take it out of the pool.
    ///
    /// Waiters are served in arrival order. Without an `acquire_timeout`
    /// this waits as long as it takes for replenishment to catch up.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Overloaded`] if `acquire_timeout` elapses first.
    /// - [`CoreError::ShuttingDown`] if the pool is (or gets) shut down.
    pub async fn acquire(&self) -> Result<Lease, CoreError> {
        let waited = Instant::now();

        let permit = match self.inner.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.available.acquire())
                .await
                .map_err(|_| {
                    tracing::warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "No sandbox became available before the acquire deadline"
                    );
                    CoreError::Overloaded(limit)
                })?,
            None => self.inner.available.acquire().await,
        }
        .map_err(|_| CoreError::ShuttingDown)?;
        // The permit stands for the sandbox we are about to pop
        permit.forget();

        let sandbox = self
            .inner
            .ready
            .lock()
            .await
            .pop_front()
            .ok_or(CoreError::ShuttingDown)?;

        let mut lease = Lease {
            pool: self.clone(),
            sandbox: Some(sandbox),
        };
        // On failure the lease drop still retires the sandbox
        lease.sandbox_mut().advance(SandboxState::InUse)?;
        self.inner.stats.acquired.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            sandbox_id = %lease.id().short(),
            waited_ms = waited.elapsed().as_millis() as u64,
            ready = self.inner.available.available_permits(),
            "Acquired sandbox"
        );
        Ok(lease)
    }

    /// Provision one sandbox and enqueue it. Returns whether it was enqueued.
    ///
    /// Failures are logged and counted, never propagated.
    pub async fn replenish(&self) -> bool {
        if self.is_closed() {
            tracing::trace!("Skipping replenishment, pool closed");
            return false;
        }

        match self.provision().await {
            Ok(sandbox) => self.enqueue(sandbox).await,
            Err(CoreError::ShuttingDown) => false,
            Err(e) => {
                self.inner
                    .stats
                    .provision_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Failed to provision sandbox, pool below capacity");
                false
            }
        }
    }

    /// Run [`replenish()`](Self::replenish) as a tracked background task.
    pub fn spawn_replenish(&self) {
        if self.is_closed() {
            return;
        }
        let pool = self.clone();
        self.spawn_tracked(async move {
            pool.replenish().await;
        });
    }

    /// Kill and remove the sandbox, then delete its workspace.
    ///
    /// Teardown failures are logged and counted, never retried.
    pub async fn retire(&self, mut sandbox: Sandbox) {
        let start = Instant::now();
        let _ = sandbox.advance(SandboxState::Retiring);
        tracing::debug!(sandbox_id = %sandbox.id().short(), "Retiring sandbox");

        if let Err(e) = self.inner.runtime.stop_and_remove(sandbox.id()).await {
            self.inner
                .stats
                .teardown_failures
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                sandbox_id = %sandbox.id().short(),
                error = %e,
                "Failed to remove sandbox, container may leak"
            );
        }
        self.inner.allocator.destroy(sandbox.workspace()).await;

        let _ = sandbox.advance(SandboxState::Destroyed);
        self.inner.stats.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            sandbox_id = %sandbox.id().short(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox destroyed"
        );
    }

    /// Run [`retire()`](Self::retire) as a tracked background task.
    pub fn spawn_retire(&self, sandbox: Sandbox) {
        let pool = self.clone();
        self.spawn_tracked(async move {
            pool.retire(sandbox).await;
        });
    }

    /// Stop accepting sandboxes, retire every ready one, and wait (bounded by
    /// `shutdown_grace`) for outstanding background tasks.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Pool already shut down");
            return;
        }
        tracing::info!("Shutting down sandbox pool");

        // Wake all waiters with an error
        self.inner.available.close();

        let sandboxes: Vec<Sandbox> = {
            let mut ready = self.inner.ready.lock().await;
            std::mem::take(&mut *ready).into_iter().collect()
        };

        let count = sandboxes.len();
        tracing::info!(count, "Destroying pooled sandboxes");
        futures::future::join_all(sandboxes.into_iter().map(|s| self.retire(s))).await;

        self.inner.tasks.close();
        let grace = self.inner.config.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = self.inner.tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "Abandoning background sandbox tasks"
            );
        }

        tracing::info!(
            destroyed = count,
            created = self.inner.stats.created(),
            acquired = self.inner.stats.acquired(),
            "Pool shutdown complete"
        );
    }

    /// Get the current number of ready sandboxes.
    pub async fn size(&self) -> usize {
        self.inner.ready.lock().await.len()
    }

    /// Get the steady-state capacity.
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the pool statistics.
    pub fn stats(&self) -> &PoolStats {
        &self.inner.stats
    }

    /// Get the runtime client shared by the pool.
    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.inner.runtime
    }

    /// Number of retire/replenish/fill tasks still running.
    pub fn background_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Whether `shutdown()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Copy the counters together with the current queue length.
    pub async fn snapshot(&self) -> PoolSnapshot {
        let stats = &self.inner.stats;
        PoolSnapshot {
            capacity: self.capacity(),
            ready: self.size().await,
            background_tasks: self.background_tasks(),
            created: stats.created(),
            destroyed: stats.destroyed(),
            acquired: stats.acquired(),
            provision_failures: stats.provision_failures(),
            teardown_failures: stats.teardown_failures(),
            executions: stats.executions(),
            timeouts: stats.timeouts(),
        }
    }

    /// Create a sandbox, retrying with linear backoff.
    async fn provision(&self) -> Result<Sandbox, CoreError> {
        let attempts = self.inner.config.provision_attempts;
        let mut last_error = CoreError::Provisioning("no attempt made".into());

        for attempt in 1..=attempts {
            if self.is_closed() {
                return Err(CoreError::ShuttingDown);
            }
            match self.provision_once().await {
                Ok(sandbox) => return Ok(sandbox),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Provisioning attempt failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.config.retry_backoff * attempt).await;
            }
        }
        Err(last_error)
    }

    /// One provisioning attempt: a fresh workspace plus a container mounting it.
    async fn provision_once(&self) -> Result<Sandbox, CoreError> {
        let config = &self.inner.config;
        let start = Instant::now();

        let workspace = self
            .inner
            .allocator
            .create()
            .await
            .map_err(|e| CoreError::Provisioning(format!("workspace: {e}")))?;
        let mount = Mount::new(&workspace, &config.container_source_dir);

        let created = tokio::time::timeout(
            config.provision_timeout,
            self.inner.runtime.create(&config.image, &mount),
        )
        .await;

        let id = match created {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                self.inner.allocator.destroy(&workspace).await;
                return Err(e);
            }
            Err(_) => {
                self.inner.allocator.destroy(&workspace).await;
                return Err(CoreError::Provisioning(format!(
                    "runtime create timed out after {:?}",
                    config.provision_timeout
                )));
            }
        };

        self.inner.stats.created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            sandbox_id = %id.short(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "New sandbox"
        );
        Ok(Sandbox::new(id, workspace))
    }

    /// Mark ready and push to the back of the queue, or retire if closed.
    async fn enqueue(&self, mut sandbox: Sandbox) -> bool {
        let _ = sandbox.advance(SandboxState::Ready);

        let mut ready = self.inner.ready.lock().await;
        // Checked under the lock: shutdown flips the flag before draining
        if self.is_closed() {
            drop(ready);
            tracing::debug!(
                sandbox_id = %sandbox.id().short(),
                "Pool closed, retiring new sandbox"
            );
            self.retire(sandbox).await;
            return false;
        }
        ready.push_back(sandbox);
        let size = ready.len();
        drop(ready);

        self.inner.available.add_permits(1);
        tracing::debug!(pool_size = size, "Added sandbox to pool");
        true
    }

    /// Retire a used sandbox and provision its replacement, both detached.
    fn recycle(&self, sandbox: Sandbox) {
        self.spawn_retire(sandbox);
        self.spawn_replenish();
    }

    fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.inner.tasks.spawn_on(task, &handle);
            }
            Err(_) => {
                tracing::error!("No async runtime available, background sandbox task dropped");
            }
        }
    }
}

// ============================================================================
// Lease
// ============================================================================

/// Exclusive, single-use hold on an acquired sandbox.
///
/// Dropping the lease (normally, on error, or because the request was
/// cancelled) schedules retirement of the sandbox and provisioning of its
/// replacement without waiting for either.
pub struct Lease {
    pool: SandboxPool,
    sandbox: Option<Sandbox>,
}

impl Lease {
    /// Get the runtime handle of the leased sandbox.
    pub fn id(&self) -> &SandboxId {
        self.sandbox().id()
    }

    /// Get the host workspace of the leased sandbox.
    pub fn workspace(&self) -> &Path {
        self.sandbox().workspace()
    }

    fn sandbox(&self) -> &Sandbox {
        // Only emptied in Drop
        match &self.sandbox {
            Some(sandbox) => sandbox,
            None => unreachable!("lease used after release"),
        }
    }

    fn sandbox_mut(&mut self) -> &mut Sandbox {
        match &mut self.sandbox {
            Some(sandbox) => sandbox,
            None => unreachable!("lease used after release"),
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

impl Deref for Lease {
    type Target = Sandbox;

    fn deref(&self) -> &Sandbox {
        self.sandbox()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            tracing::trace!(sandbox_id = %sandbox.id().short(), "Lease released");
            self.pool.recycle(sandbox);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_config(root: &Path, capacity: usize) -> PoolConfig {
        PoolConfig::builder()
            .capacity(capacity)
            .image("test-image")
            .storage_root(root)
            .provision_attempts(1)
            .retry_backoff(Duration::from_millis(10))
            .shutdown_grace(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    async fn wait_for_size(pool: &SandboxPool, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.size().await != expected {
            assert!(
                Instant::now() < deadline,
                "pool never reached size {expected}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();
        assert_eq!(stats.created(), 0);
        assert_eq!(stats.destroyed(), 0);
        assert_eq!(stats.acquired(), 0);
        assert_eq!(stats.executions(), 0);
    }

    #[test]
    fn test_record_execution() {
        let stats = PoolStats::default();
        stats.record_execution(false);
        stats.record_execution(true);
        assert_eq!(stats.executions(), 2);
        assert_eq!(stats.timeouts(), 1);
    }

    #[tokio::test]
    async fn test_fill_reaches_capacity() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime.clone(), test_config(tmp.path(), 3));

        assert_eq!(pool.size().await, 0);
        assert_eq!(pool.fill().await, 3);
        assert_eq!(pool.size().await, 3);
        assert_eq!(runtime.created(), 3);
        assert_eq!(pool.stats().created(), 3);
    }

    #[tokio::test]
    async fn test_fill_tolerates_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_next_creates(2);
        let pool = SandboxPool::new(runtime.clone(), test_config(tmp.path(), 4));

        assert_eq!(pool.fill().await, 2);
        assert_eq!(pool.size().await, 2);
        assert_eq!(pool.stats().provision_failures(), 2);

        // failed attempts leave no workspace behind
        let dirs = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(dirs, 2);
    }

    #[tokio::test]
    async fn test_provision_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_next_creates(1);
        let mut config = test_config(tmp.path(), 2);
        config.provision_attempts = 2;
        let pool = SandboxPool::new(runtime.clone(), config);

        assert_eq!(pool.fill().await, 2);
        assert_eq!(pool.stats().provision_failures(), 0);
        assert_eq!(runtime.created(), 2);
    }

    #[tokio::test]
    async fn test_provision_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_create_delay(Duration::from_secs(2)));
        let mut config = test_config(tmp.path(), 1);
        config.provision_timeout = Duration::from_millis(50);
        let pool = SandboxPool::new(runtime, config);

        let start = Instant::now();
        assert_eq!(pool.fill().await, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.stats().provision_failures(), 1);
    }

    #[tokio::test]
    async fn test_acquire_is_single_use() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime.clone(), test_config(tmp.path(), 2));
        pool.fill().await;

        let mut seen = HashSet::new();
        for _ in 0..6 {
            let lease = pool.acquire().await.unwrap();
            assert_eq!(lease.state(), SandboxState::InUse);
            assert!(format!("{lease:?}").contains(lease.id().as_str()));
            assert!(seen.insert(lease.id().clone()), "sandbox handed out twice");
        }

        wait_for_size(&pool, 2).await;
        assert_eq!(pool.stats().acquired(), 6);
        // 2 from fill + 6 replacements
        assert_eq!(runtime.created(), 8);
    }

    #[tokio::test]
    async fn test_lease_drop_retires_and_replenishes() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime.clone(), test_config(tmp.path(), 1));
        pool.fill().await;

        let lease = pool.acquire().await.unwrap();
        let id = lease.id().clone();
        let workspace = lease.workspace().to_path_buf();
        assert_eq!(pool.size().await, 0);

        drop(lease);
        wait_for_size(&pool, 1).await;

        let deadline = Instant::now() + Duration::from_secs(5);
        while !runtime.removed().contains(&id) {
            assert!(Instant::now() < deadline, "sandbox never removed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_replenishment() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime, test_config(tmp.path(), 1));
        pool.fill().await;

        let first = pool.acquire().await.unwrap();

        // empty pool: the second acquirer blocks
        let blocked = tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
        assert!(blocked.is_err());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|l| l.id().clone()) })
        };
        let first_id = first.id().clone();
        drop(first);

        let second_id = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter served")
            .unwrap()
            .unwrap();
        assert_ne!(first_id, second_id);
    }

    #[tokio::test]
    async fn test_waiters_served_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime, test_config(tmp.path(), 1));
        pool.fill().await;

        let held = pool.acquire().await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for name in ["first", "second", "third"] {
            let pool = pool.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let lease = pool.acquire().await.unwrap();
                tx.send(name).unwrap();
                drop(lease);
            });
            // let each waiter queue up before the next
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(held);

        let mut order = Vec::new();
        for _ in 0..3 {
            let name = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            order.push(name);
        }
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_acquire_timeout_reports_overload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path(), 1);
        config.acquire_timeout = Some(Duration::from_millis(50));
        let pool = SandboxPool::new(Arc::new(FakeRuntime::new()), config);

        // never filled
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, CoreError::Overloaded(_)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime.clone(), test_config(tmp.path(), 3));
        pool.fill().await;

        pool.shutdown().await;
        assert!(pool.is_closed());
        assert_eq!(pool.size().await, 0);
        assert_eq!(runtime.removed().len(), 3);
        assert_eq!(runtime.live(), 0);

        pool.shutdown().await;
        assert_eq!(runtime.removed().len(), 3);
        assert_eq!(pool.stats().destroyed(), 3);
        assert_eq!(pool.stats().teardown_failures(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = SandboxPool::new(Arc::new(FakeRuntime::new()), test_config(tmp.path(), 1));

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(CoreError::ShuttingDown)));
        assert!(matches!(pool.acquire().await, Err(CoreError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_lease_after_shutdown_is_retired_not_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SandboxPool::new(runtime.clone(), test_config(tmp.path(), 2));
        pool.fill().await;

        let lease = pool.acquire().await.unwrap();
        pool.shutdown().await;
        assert_eq!(runtime.removed().len(), 1);

        drop(lease);
        let deadline = Instant::now() + Duration::from_secs(5);
        while runtime.removed().len() < 2 {
            assert!(Instant::now() < deadline, "leased sandbox never removed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.created(), 2);
        assert_eq!(pool.size().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = SandboxPool::new(Arc::new(FakeRuntime::new()), test_config(tmp.path(), 2));
        pool.fill().await;

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.capacity, 2);
        assert_eq!(snapshot.ready, 2);
        assert_eq!(snapshot.created, 2);
        assert_eq!(snapshot.acquired, 0);
    }
}

//! Process shutdown coordination.
//!
//! SIGINT or SIGTERM flips a single watch flag. The HTTP server stops
//! accepting work when it sees the flag, and at the same time
//! [`ShutdownCoordinator::run`] drains the pool through
//! [`ShutdownCoordinator::shutdown_pool`], which runs at most once no matter
//! how many signals arrive.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use webcompile_core::SandboxPool;

/// Shared handle that turns termination signals into one orderly shutdown.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    pool: SandboxPool,
    trigger: watch::Sender<bool>,
    drained: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(pool: SandboxPool) -> Self {
        let (trigger, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pool,
                trigger,
                drained: AtomicBool::new(false),
            }),
        }
    }

    /// Wait for SIGINT (or SIGTERM on unix), then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received SIGINT"),
            _ = terminate => tracing::info!("Received SIGTERM"),
        }

        self.trigger();
    }

    /// Mark the process as shutting down. Later calls are no-ops.
    pub fn trigger(&self) {
        let first = self.inner.trigger.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        });
        if first {
            tracing::info!("Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.trigger.borrow()
    }

    /// Resolves once shutdown has been triggered.
    ///
    /// Suitable for `axum::serve(..).with_graceful_shutdown`.
    pub async fn triggered(&self) {
        let mut rx = self.inner.trigger.subscribe();
        // the sender lives in `self`, so this can only fail if it was dropped
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Drive `server` to completion, draining the pool as soon as shutdown
    /// is triggered.
    ///
    /// The drain runs while the server is still finishing in-flight
    /// requests, so a request parked waiting for a sandbox is woken with
    /// `ShuttingDown` instead of holding the server open. If the server
    /// stops on its own, shutdown is triggered so the pool is drained anyway.
    pub async fn run<F, T, E>(&self, server: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let server = async {
            let result = server.await;
            self.trigger();
            result
        };
        let drain = async {
            self.triggered().await;
            self.shutdown_pool().await;
        };

        let (result, _) = tokio::join!(server, drain);
        result
    }

    /// Drain and retire every pooled sandbox. Runs at most once.
    ///
    /// Returns `false` if an earlier call already did the work.
    pub async fn shutdown_pool(&self) -> bool {
        if self.inner.drained.swap(true, Ordering::SeqCst) {
            tracing::debug!("Pool already shut down");
            return false;
        }
        self.trigger();

        let ready = self.inner.pool.size().await;
        tracing::info!(ready, "Draining sandbox pool");
        self.inner.pool.shutdown().await;
        true
    }
}

//! In-process runtime for tests.
//!
//! [`FakeRuntime`] hands out `fake-N` ids and runs exec'd commands with
//! `sh -c` on the host, inside the sandbox's workspace directory. Deadlines,
//! output capture and kill therefore act on real processes.

use crate::error::CoreError;
use crate::runtime::{Mount, SandboxRuntime};
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Runtime double that records every call.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    create_delay: Duration,
    next_id: AtomicUsize,
    failing_creates: AtomicUsize,
    execs: AtomicUsize,
    live: Mutex<HashMap<SandboxId, PathBuf>>,
    removed: Mutex<Vec<SandboxId>>,
}

impl FakeRuntime {
    /// Create a runtime that provisions instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `create` call.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Make the next `count` `create` calls fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Number of sandboxes created so far.
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Number of commands started.
    pub fn execs(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    /// Number of sandboxes created and not yet removed.
    pub fn live(&self) -> usize {
        self.lock_live().len()
    }

    /// Ids passed to `stop_and_remove`, in call order.
    pub fn removed(&self) -> Vec<SandboxId> {
        self.removed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, HashMap<SandboxId, PathBuf>> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, _image: &str, mount: &Mount) -> Result<SandboxId, CoreError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }

        let fail = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CoreError::Provisioning("injected create failure".into()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = SandboxId::new(format!("fake-{n}"));
        self.lock_live().insert(id.clone(), mount.host_path.clone());
        Ok(id)
    }

    async fn exec(&self, id: &SandboxId, command: &str) -> Result<Child, CoreError> {
        let dir = self
            .lock_live()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::Runtime(format!("no such sandbox: {id}")))?;
        self.execs.fetch_add(1, Ordering::SeqCst);

        Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Runtime(format!("spawn failed: {e}")))
    }

    async fn stop_and_remove(&self, id: &SandboxId) -> Result<(), CoreError> {
        let existed = self.lock_live().remove(id).is_some();
        self.removed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(id.clone());
        if existed {
            Ok(())
        } else {
            Err(CoreError::Teardown(format!("no such sandbox: {id}")))
        }
    }
}

//! Sandbox type - one isolated container paired with its workspace.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque handle the isolation runtime assigned to a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(String);

impl SandboxId {
    /// Wrap a runtime handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw handle.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines (docker ids are 64 hex chars).
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SandboxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a sandbox.
///
/// States only move forward; nothing returns to `Ready` once it left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SandboxState {
    /// Container and workspace are being created.
    Provisioning,
    /// Sitting in the pool, never used.
    Ready,
    /// Handed out to exactly one execution.
    InUse,
    /// Being killed and removed.
    Retiring,
    /// Container and workspace are gone.
    Destroyed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Ready => write!(f, "Ready"),
            Self::InUse => write!(f, "InUse"),
            Self::Retiring => write!(f, "Retiring"),
            Self::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// A provisioned container together with the host workspace mounted into it.
///
/// Not `Clone`: ownership of the value is the single-use guarantee.
#[derive(Debug)]
pub struct Sandbox {
    id: SandboxId,
    workspace: PathBuf,
    state: SandboxState,
    created_at: DateTime<Utc>,
}

impl Sandbox {
    /// Build a sandbox record for a freshly created container.
    pub(crate) fn new(id: SandboxId, workspace: PathBuf) -> Self {
        Self {
            id,
            workspace,
            state: SandboxState::Provisioning,
            created_at: Utc::now(),
        }
    }

    /// Get the runtime handle.
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Get the host workspace path.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Get the current state.
    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move to `next`, which must be strictly later in the lifecycle.
    pub(crate) fn advance(&mut self, next: SandboxState) -> Result<(), CoreError> {
        if next <= self.state {
            return Err(CoreError::InvalidState {
                expected: format!("state after {}", self.state),
                actual: next.to_string(),
            });
        }
        tracing::trace!(
            sandbox_id = %self.id.short(),
            from = %self.state,
            to = %next,
            "Sandbox state change"
        );
        self.state = next;
        Ok(())
    }
}

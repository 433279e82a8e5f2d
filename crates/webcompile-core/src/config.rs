//! Pool and executor configuration types.

use crate::error::CoreError;
use std::path::PathBuf;
use std::time::Duration;

/// Default in-sandbox directory the workspace is mounted at.
pub const DEFAULT_CONTAINER_SOURCE_DIR: &str = "/home/code/source";

/// Configuration for the sandbox pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of ready sandboxes kept warm (default: 5).
    pub capacity: usize,
    /// Container image every sandbox is started from (default: `mono`).
    pub image: String,
    /// Host directory holding one subdirectory per workspace.
    pub storage_root: PathBuf,
    /// Path the workspace is mounted at inside the sandbox.
    pub container_source_dir: String,
    /// Deadline for a single runtime `create` call.
    pub provision_timeout: Duration,
    /// Attempts per provisioning request before giving up (default: 3).
    pub provision_attempts: u32,
    /// Base backoff between provisioning attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Maximum time `acquire()` waits for a sandbox. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
    /// How long shutdown waits for outstanding background tasks.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            image: "mono".to_string(),
            storage_root: PathBuf::from("runs"),
            container_source_dir: DEFAULT_CONTAINER_SOURCE_DIR.to_string(),
            provision_timeout: Duration::from_secs(30),
            provision_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            acquire_timeout: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Create a new config builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.capacity == 0 {
            return Err(CoreError::Config("capacity must be > 0".into()));
        }
        if self.image.trim().is_empty() {
            return Err(CoreError::Config("image is required".into()));
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(CoreError::Config("storage_root is required".into()));
        }
        if !self.container_source_dir.starts_with('/') {
            return Err(CoreError::Config(
                "container_source_dir must be absolute".into(),
            ));
        }
        if self.provision_attempts == 0 {
            return Err(CoreError::Config("provision_attempts must be > 0".into()));
        }
        if self.provision_timeout.is_zero() {
            return Err(CoreError::Config("provision_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for PoolConfig.
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the number of warm sandboxes.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the container image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    /// Set the host storage root for workspaces.
    pub fn storage_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_root = path.into();
        self
    }

    /// Set the in-sandbox mount point of the workspace.
    pub fn container_source_dir(mut self, path: impl Into<String>) -> Self {
        self.config.container_source_dir = path.into();
        self
    }

    /// Set the per-attempt provisioning deadline.
    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.config.provision_timeout = timeout;
        self
    }

    /// Set the number of provisioning attempts.
    pub fn provision_attempts(mut self, attempts: u32) -> Self {
        self.config.provision_attempts = attempts;
        self
    }

    /// Set the base retry backoff.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Bound the time callers wait in `acquire()`.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = Some(timeout);
        self
    }

    /// Set the shutdown grace period for background tasks.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<PoolConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for code execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock limit for the build/run command (default: 5s).
    pub timeout: Duration,
    /// Largest accepted source, in bytes (default: 8 KiB).
    pub max_code_size: usize,
    /// Cap applied separately to stdout and stderr (default: 1 MiB).
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_code_size: 8 * 1024,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ExecutorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.timeout.is_zero() {
            return Err(CoreError::Config("timeout must be > 0".into()));
        }
        if self.max_code_size == 0 {
            return Err(CoreError::Config("max_code_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 5);
        assert_eq!(config.image, "mono");
        assert_eq!(config.container_source_dir, "/home/code/source");
        assert!(config.acquire_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = PoolConfig::builder().capacity(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_relative_mount() {
        let result = PoolConfig::builder().container_source_dir("code").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_success() {
        let config = PoolConfig::builder()
            .capacity(2)
            .image("alpine")
            .storage_root("/tmp/webcompile")
            .acquire_timeout(Duration::from_secs(3))
            .provision_attempts(1)
            .build()
            .expect("should build successfully");

        assert_eq!(config.capacity, 2);
        assert_eq!(config.image, "alpine");
        assert_eq!(config.storage_root, PathBuf::from("/tmp/webcompile"));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.provision_attempts, 1);
    }

    #[test]
    fn test_executor_config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_code_size, 8192);
        assert!(config.validate().is_ok());
    }
}

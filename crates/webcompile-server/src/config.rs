//! Configuration for the HTTP server.
//!
//! Configuration is loaded once from environment variables with sensible
//! defaults and is read-only afterwards.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use webcompile_core::{ExecutorConfig, PoolConfig};

/// Configuration for the webcompile server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of warm sandboxes (default: 5).
    pub pool_size: usize,

    /// Container image sandboxes are started from (default: `mono`).
    pub image: String,

    /// Container CLI binary (default: `docker`).
    pub docker_binary: String,

    /// Execution deadline (default: 5s).
    pub execution_timeout: Duration,

    /// Largest accepted source in bytes (default: 8 KiB).
    pub max_code_size: usize,

    /// Cap per output stream in bytes (default: 1 MiB).
    pub max_output_bytes: usize,

    /// `Access-Control-Allow-Origin` value; empty disables CORS (default: `*`).
    pub cors_header: String,

    /// HTTP server bind address (default: `0.0.0.0:8000`).
    pub http_addr: SocketAddr,

    /// Host directory that holds the per-sandbox workspaces.
    pub storage_root: PathBuf,

    /// Serve pool statistics on `/stats` (default: true).
    pub stats_enabled: bool,

    /// Bound on waiting for a sandbox; `None` waits forever.
    pub acquire_timeout: Option<Duration>,

    /// Deadline for creating one container (default: 30s).
    pub provision_timeout: Duration,

    /// Container creation attempts before giving up (default: 3).
    pub provision_attempts: u32,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pool size must be at least 1")]
    EmptyPool,

    #[error("image name is empty")]
    MissingImage,

    #[error("max code size must be at least 1 byte")]
    InvalidCodeLimit,

    #[error("execution timeout must be non-zero")]
    InvalidTimeout,

    #[error("storage root parent directory not found: {0}")]
    InvalidStorageRoot(PathBuf),

    #[error("invalid CORS header value: {0:?}")]
    InvalidCors(String),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            image: "mono".to_string(),
            docker_binary: "docker".to_string(),
            execution_timeout: Duration::from_secs(5),
            max_code_size: 8 * 1024,
            max_output_bytes: 1024 * 1024,
            cors_header: "*".to_string(),
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8000),
            storage_root: default_storage_root(),
            stats_enabled: true,
            acquire_timeout: None,
            provision_timeout: Duration::from_secs(30),
            provision_attempts: 3,
        }
    }
}

/// `<cwd>/runs`, or a relative `runs` if the cwd is unreadable.
fn default_storage_root() -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join("runs"))
        .unwrap_or_else(|_| PathBuf::from("runs"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WEBCOMPILE_POOL_SIZE` | `5` |
    /// | `WEBCOMPILE_IMAGE` | `mono` |
    /// | `WEBCOMPILE_DOCKER` | `docker` |
    /// | `WEBCOMPILE_TIMEOUT_MS` | `5000` |
    /// | `WEBCOMPILE_MAX_CODE_BYTES` | `8192` |
    /// | `WEBCOMPILE_MAX_OUTPUT_BYTES` | `1048576` |
    /// | `WEBCOMPILE_CORS` | `*` (empty disables) |
    /// | `WEBCOMPILE_HOST` | `0.0.0.0` |
    /// | `WEBCOMPILE_PORT` | `8000` |
    /// | `WEBCOMPILE_STORAGE` | `<cwd>/runs` |
    /// | `WEBCOMPILE_STATS` | `true` |
    /// | `WEBCOMPILE_ACQUIRE_TIMEOUT_MS` | unset (wait forever) |
    /// | `WEBCOMPILE_PROVISION_TIMEOUT_MS` | `30000` |
    /// | `WEBCOMPILE_PROVISION_ATTEMPTS` | `3` |
    pub fn from_env() -> Self {
        let default = Self::default();

        let http_host: IpAddr =
            env_parse("WEBCOMPILE_HOST").unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        let http_port: u16 = env_parse("WEBCOMPILE_PORT").unwrap_or(default.http_addr.port());

        Self {
            pool_size: env_parse("WEBCOMPILE_POOL_SIZE").unwrap_or(default.pool_size),
            image: std::env::var("WEBCOMPILE_IMAGE").unwrap_or(default.image),
            docker_binary: std::env::var("WEBCOMPILE_DOCKER").unwrap_or(default.docker_binary),
            execution_timeout: env_millis("WEBCOMPILE_TIMEOUT_MS")
                .unwrap_or(default.execution_timeout),
            max_code_size: env_parse("WEBCOMPILE_MAX_CODE_BYTES").unwrap_or(default.max_code_size),
            max_output_bytes: env_parse("WEBCOMPILE_MAX_OUTPUT_BYTES")
                .unwrap_or(default.max_output_bytes),
            cors_header: std::env::var("WEBCOMPILE_CORS").unwrap_or(default.cors_header),
            http_addr: SocketAddr::new(http_host, http_port),
            storage_root: std::env::var("WEBCOMPILE_STORAGE")
                .map(PathBuf::from)
                .unwrap_or(default.storage_root),
            stats_enabled: std::env::var("WEBCOMPILE_STATS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default.stats_enabled),
            acquire_timeout: env_millis("WEBCOMPILE_ACQUIRE_TIMEOUT_MS"),
            provision_timeout: env_millis("WEBCOMPILE_PROVISION_TIMEOUT_MS")
                .unwrap_or(default.provision_timeout),
            provision_attempts: env_parse("WEBCOMPILE_PROVISION_ATTEMPTS")
                .unwrap_or(default.provision_attempts),
        }
    }

    /// Validate the configuration.
    ///
    /// Call this at startup to get clear error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }

        if self.image.trim().is_empty() {
            return Err(ConfigError::MissingImage);
        }

        if self.max_code_size == 0 {
            return Err(ConfigError::InvalidCodeLimit);
        }

        if self.execution_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }

        // storage root is created on demand, so just check its parent exists
        if let Some(parent) = self.storage_root.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidStorageRoot(self.storage_root.clone()));
            }
        }

        if axum::http::HeaderValue::from_str(&self.cors_header).is_err() {
            return Err(ConfigError::InvalidCors(self.cors_header.clone()));
        }

        Ok(())
    }

    /// Log configuration choices that work but are probably unintended.
    pub fn validate_warn(&self) {
        if self.acquire_timeout.is_none() {
            tracing::warn!(
                "No acquire timeout set, requests wait indefinitely when the pool is empty"
            );
        }

        if self.cors_header == "*" {
            tracing::warn!("CORS allows any origin");
        }

        if self.pool_size > 64 {
            tracing::warn!(pool_size = self.pool_size, "Large pool, startup may be slow");
        }
    }

    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool_size,
            image: self.image.clone(),
            storage_root: self.storage_root.clone(),
            acquire_timeout: self.acquire_timeout,
            provision_timeout: self.provision_timeout,
            provision_attempts: self.provision_attempts,
            ..PoolConfig::default()
        }
    }

    /// Executor settings derived from this configuration.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: self.execution_timeout,
            max_code_size: self.max_code_size,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

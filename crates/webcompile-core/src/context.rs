//! Application context built once at startup.

use crate::config::{ExecutorConfig, PoolConfig};
use crate::error::CoreError;
use crate::executor::Executor;
use crate::pool::SandboxPool;
use crate::registry::CommandRegistry;
use crate::runtime::SandboxRuntime;
use std::sync::Arc;

/// Everything request handlers and the shutdown path share: one runtime
/// client, one pool, one executor.
#[derive(Clone)]
pub struct AppContext {
    pool: SandboxPool,
    executor: Executor,
}

impl AppContext {
    /// Validate the configuration and wire the components together.
    ///
    /// The pool starts empty; call `pool().fill()` or `pool().spawn_fill()`.
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        pool_config: PoolConfig,
        executor_config: ExecutorConfig,
        registry: CommandRegistry,
    ) -> Result<Self, CoreError> {
        pool_config.validate()?;
        executor_config.validate()?;
        if registry.languages().next().is_none() {
            return Err(CoreError::Config("no languages registered".into()));
        }

        let pool = SandboxPool::new(runtime, pool_config);
        let executor = Executor::new(pool.clone(), registry, executor_config);
        Ok(Self { pool, executor })
    }

    /// Get the sandbox pool.
    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    /// Get the executor.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    #[test]
    fn test_rejects_empty_registry() {
        let result = AppContext::new(
            Arc::new(FakeRuntime::new()),
            PoolConfig::default(),
            ExecutorConfig::default(),
            CommandRegistry::new(),
        );
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_invalid_pool_config() {
        let pool_config = PoolConfig {
            capacity: 0,
            ..PoolConfig::default()
        };
        let result = AppContext::new(
            Arc::new(FakeRuntime::new()),
            pool_config,
            ExecutorConfig::default(),
            CommandRegistry::with_defaults(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shares_one_pool() {
        let tmp = tempfile::tempdir().unwrap();
        let pool_config = PoolConfig::builder()
            .capacity(2)
            .storage_root(tmp.path())
            .build()
            .unwrap();
        let ctx = AppContext::new(
            Arc::new(FakeRuntime::new()),
            pool_config,
            ExecutorConfig::default(),
            CommandRegistry::with_defaults(),
        )
        .unwrap();

        ctx.pool().fill().await;
        let clone = ctx.clone();
        assert_eq!(clone.pool().size().await, 2);
        assert_eq!(ctx.executor().registry().lookup("c#").unwrap().source_file, "code.cs");
    }
}

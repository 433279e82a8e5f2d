//! # webcompile-core
//!
//! Sandbox pool and execution coordinator for running untrusted code.
//!
//! Containers are provisioned ahead of demand, handed to exactly one
//! execution each, and destroyed afterwards, so nothing one submission does
//! can be observed by the next.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   webcompile-core                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Executor     │────▶│     CommandRegistry      │   │
//! │  │  - validate()   │     │  language → command      │   │
//! │  │  - execute()    │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │           │ acquire() / Lease drop                      │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   SandboxPool   │────▶│   WorkspaceAllocator     │   │
//! │  │  - fill()       │     │  <root>/<date><uuid>     │   │
//! │  │  - acquire()    │     └──────────────────────────┘   │
//! │  │  - replenish()  │                                    │
//! │  │  - retire()     │     ┌──────────────────────────┐   │
//! │  │  - shutdown()   │────▶│  dyn SandboxRuntime      │   │
//! │  └─────────────────┘     │  (DockerRuntime)         │   │
//! │                          └──────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use webcompile_core::{
//!     AppContext, CommandRegistry, DockerRuntime, ExecutorConfig, PoolConfig,
//! };
//!
//! # async fn example() -> webcompile_core::Result<()> {
//! let ctx = AppContext::new(
//!     Arc::new(DockerRuntime::default()),
//!     PoolConfig::builder().capacity(5).image("mono").build()?,
//!     ExecutorConfig::default(),
//!     CommandRegistry::with_defaults(),
//! )?;
//! ctx.pool().fill().await;
//!
//! let result = ctx
//!     .executor()
//!     .execute("C#", "class X { static void Main() { System.Console.WriteLine(1); } }")
//!     .await?;
//! println!("{} (timed out: {})", result.stdout, result.timed_out);
//!
//! ctx.pool().shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod error;
mod executor;
mod pool;
mod registry;
mod runtime;
mod sandbox;
mod workspace;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ExecutorConfig, PoolConfig, PoolConfigBuilder, DEFAULT_CONTAINER_SOURCE_DIR};
pub use context::AppContext;
pub use error::{CoreError, Result};
pub use executor::{ExecutionResult, Executor};
pub use pool::{Lease, PoolSnapshot, PoolStats, SandboxPool};
pub use registry::{CommandRegistry, LanguageCommand};
pub use runtime::{DockerRuntime, Mount, SandboxRuntime};
pub use sandbox::{Sandbox, SandboxId, SandboxState};
pub use workspace::WorkspaceAllocator;

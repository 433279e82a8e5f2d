//! # webcompile-server
//!
//! HTTP front end for the webcompile sandbox pool.
//!
//! Submissions arrive as form posts on `/compile`, run in a single-use
//! container drawn from [`webcompile_core::SandboxPool`], and come back as
//! JSON. SIGINT/SIGTERM stop the listener and drain the pool.

pub mod config;
pub mod http;
pub mod shutdown;

pub use config::{ConfigError, ServerConfig};
pub use shutdown::ShutdownCoordinator;

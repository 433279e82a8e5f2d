//! Integration tests against a real Docker daemon.
//!
//! These tests require:
//! - A running Docker daemon reachable by the `docker` CLI
//! - An image with `/bin/bash` (defaults to `debian:stable-slim`, override with
//!   `WEBCOMPILE_TEST_IMAGE`)
//!
//! Run with: `cargo test -p webcompile-core --test docker -- --ignored`

use std::sync::Arc;
use std::time::{Duration, Instant};
use webcompile_core::{
    AppContext, CommandRegistry, CoreError, DockerRuntime, ExecutorConfig, LanguageCommand,
    PoolConfig,
};

fn test_image() -> String {
    std::env::var("WEBCOMPILE_TEST_IMAGE").unwrap_or_else(|_| "debian:stable-slim".to_string())
}

async fn context(root: &std::path::Path, capacity: usize, timeout: Duration) -> Option<AppContext> {
    let runtime = DockerRuntime::default();
    if let Err(e) = runtime.probe().await {
        eprintln!("Skipping test: docker unavailable: {e}");
        return None;
    }

    let registry = CommandRegistry::new().register(
        "bash",
        LanguageCommand::new("main.sh", "bash /home/code/source/main.sh"),
    );
    let pool_config = PoolConfig::builder()
        .capacity(capacity)
        .image(test_image())
        .storage_root(root)
        .build()
        .expect("valid pool config");
    let executor_config = ExecutorConfig {
        timeout,
        ..ExecutorConfig::default()
    };

    Some(
        AppContext::new(Arc::new(runtime), pool_config, executor_config, registry)
            .expect("valid context"),
    )
}

/// Full cycle: fill -> execute -> retire/replenish -> shutdown
#[tokio::test]
#[ignore = "requires docker"]
async fn test_execute_in_container() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(ctx) = context(tmp.path(), 2, Duration::from_secs(5)).await else {
        return;
    };

    assert_eq!(ctx.pool().fill().await, 2);

    let result = ctx
        .executor()
        .execute("bash", "echo hello from $(hostname)")
        .await
        .expect("execution succeeds");
    assert!(result.stdout.starts_with("hello from"));
    assert!(!result.timed_out);

    ctx.pool().shutdown().await;
    assert_eq!(ctx.pool().size().await, 0);
}

/// Infinite loop is cut off at the deadline
#[tokio::test]
#[ignore = "requires docker"]
async fn test_infinite_loop_times_out() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(ctx) = context(tmp.path(), 1, Duration::from_secs(2)).await else {
        return;
    };
    ctx.pool().fill().await;

    let start = Instant::now();
    let result = ctx
        .executor()
        .execute("bash", "while true; do :; done")
        .await
        .expect("execution returns a result");

    assert!(result.timed_out);
    assert!(start.elapsed() < Duration::from_secs(5));

    ctx.pool().shutdown().await;
}

/// Nothing written by one run is visible to the next
#[tokio::test]
#[ignore = "requires docker"]
async fn test_no_state_leaks_between_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let Some(ctx) = context(tmp.path(), 1, Duration::from_secs(5)).await else {
        return;
    };
    ctx.pool().fill().await;

    ctx.executor()
        .execute("bash", "echo secret > /tmp/leak")
        .await
        .expect("first run");
    let second = ctx
        .executor()
        .execute("bash", "cat /tmp/leak 2>/dev/null || echo clean")
        .await
        .expect("second run");
    assert_eq!(second.stdout.trim(), "clean");

    let err = ctx.executor().execute("bash", "").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    ctx.pool().shutdown().await;
}

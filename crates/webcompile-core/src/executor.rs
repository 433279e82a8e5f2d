//! Execution coordinator: one request, one sandbox, one deadline.

use crate::config::ExecutorConfig;
use crate::error::CoreError;
use crate::pool::SandboxPool;
use crate::registry::{CommandRegistry, LanguageCommand};
use crate::sandbox::Sandbox;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Outcome of running submitted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Captured standard output (partial if the run timed out).
    pub stdout: String,
    /// Captured standard error (partial if the run timed out).
    pub stderr: String,
    /// Wall clock from process start until it exited or was killed.
    pub elapsed_ms: u64,
    /// Whether the deadline fired and the process was killed.
    pub timed_out: bool,
    /// Exit code, `None` if killed or terminated by a signal.
    pub exit_code: Option<i32>,
}

/// Runs code in pooled sandboxes.
///
/// Each call to [`execute`](Self::execute) draws exactly one sandbox from
/// the pool; the sandbox is retired and replaced afterwards whatever the
/// outcome.
#[derive(Clone)]
pub struct Executor {
    pool: SandboxPool,
    registry: Arc<CommandRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor over `pool`.
    pub fn new(pool: SandboxPool, registry: CommandRegistry, config: ExecutorConfig) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            config,
        }
    }

    /// Get the executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get the command registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Check a request without touching the pool.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Validation`] if the code is empty or larger than
    ///   `max_code_size`, or the language is blank.
    /// - [`CoreError::UnsupportedLanguage`] if no command is registered.
    pub fn validate(&self, language: &str, code: &str) -> Result<&LanguageCommand, CoreError> {
        let size = code.len();
        if size == 0 {
            return Err(CoreError::Validation("code is empty".into()));
        }
        if size > self.config.max_code_size {
            return Err(CoreError::Validation(format!(
                "code is {size} bytes, limit is {}",
                self.config.max_code_size
            )));
        }

        let language = language.trim();
        if language.is_empty() {
            return Err(CoreError::Validation("language is required".into()));
        }
        self.registry
            .lookup(language)
            .ok_or_else(|| CoreError::UnsupportedLanguage(language.to_string()))
    }

    /// Build and run `code` in a fresh sandbox.
    ///
    /// Suspends while waiting for a sandbox and while the command runs; the
    /// command is killed once `timeout` elapses and whatever output it
    /// produced until then is returned with `timed_out` set.
    pub async fn execute(&self, language: &str, code: &str) -> Result<ExecutionResult, CoreError> {
        let command = self.validate(language, code)?;

        tracing::debug!(language = %language, code_len = code.len(), "Acquiring sandbox");
        let lease = self.pool.acquire().await?;

        let source_path = lease.workspace().join(&command.source_file);
        if let Err(e) = tokio::fs::write(&source_path, code).await {
            tracing::error!(
                sandbox_id = %lease.id().short(),
                path = %source_path.display(),
                error = %e,
                "Cannot create code file"
            );
            return Err(CoreError::Write(e));
        }

        tracing::debug!(
            sandbox_id = %lease.id().short(),
            workspace = %lease.workspace().display(),
            "Running code"
        );
        let result = self.run(&lease, &command.command).await;

        // Retire + replenish are scheduled here, not awaited
        drop(lease);

        if let Ok(ref r) = result {
            self.pool.stats().record_execution(r.timed_out);
            tracing::info!(
                language = %language,
                elapsed_ms = r.elapsed_ms,
                timed_out = r.timed_out,
                exit_code = ?r.exit_code,
                stdout_len = r.stdout.len(),
                stderr_len = r.stderr.len(),
                "Execution finished"
            );
        }
        result
    }

    /// Run `command` in the sandbox under the deadline.
    async fn run(&self, sandbox: &Sandbox, command: &str) -> Result<ExecutionResult, CoreError> {
        let runtime = self.pool.runtime();
        let limit = self.config.timeout;

        let start = Instant::now();
        let mut child = runtime.exec(sandbox.id(), command).await?;
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = CappedBuffer::new(self.config.max_output_bytes);
        let mut stderr = CappedBuffer::new(self.config.max_output_bytes);

        let finished = tokio::time::timeout(limit, async {
            let (out, err) = tokio::join!(
                drain(stdout_pipe.as_mut(), &mut stdout),
                drain(stderr_pipe.as_mut(), &mut stderr)
            );
            if let Err(e) = out.and(err) {
                tracing::debug!(error = %e, "Output stream error");
            }
            child.wait().await
        })
        .await;

        let (timed_out, exit_code) = match finished {
            Ok(Ok(status)) => (false, status.code()),
            Ok(Err(e)) => {
                tracing::warn!(
                    sandbox_id = %sandbox.id().short(),
                    error = %e,
                    "Waiting for process failed"
                );
                (false, None)
            }
            Err(_) => {
                tracing::info!(
                    sandbox_id = %sandbox.id().short(),
                    timeout_ms = limit.as_millis() as u64,
                    "Execution timed out, killing process"
                );
                // Close our ends of the pipes before killing
                drop(stdout_pipe.take());
                drop(stderr_pipe.take());
                if let Err(e) = runtime.kill(&mut child).await {
                    tracing::warn!(
                        sandbox_id = %sandbox.id().short(),
                        error = %e,
                        "Cannot kill process"
                    );
                }
                (true, None)
            }
        };

        Ok(ExecutionResult {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            timed_out,
            exit_code,
        })
    }
}

/// Read a pipe to EOF into `buf`.
///
/// Data lands in `buf` chunk by chunk, so a cancelled read keeps what
/// arrived before the cancellation.
async fn drain<R>(reader: Option<&mut R>, buf: &mut CappedBuffer) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.push(&chunk[..n]);
    }
}

/// Byte buffer that keeps the first `limit` bytes and drops the rest.
struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn into_string(self) -> String {
        let mut s = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated {
            s.push_str(TRUNCATION_MARKER);
        }
        s
    }
}

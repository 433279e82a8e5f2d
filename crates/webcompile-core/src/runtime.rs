//! Boundary to the isolation runtime.
//!
//! The pool and executor only need four operations from the runtime:
//! create a sandbox with a workspace mounted, exec a command in it, kill a
//! running exec, and stop/remove the sandbox. [`DockerRuntime`] implements
//! them by driving the `docker` CLI.

use crate::error::CoreError;
use crate::sandbox::SandboxId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A host directory bind-mounted into a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Absolute path inside the sandbox.
    pub container_path: String,
}

impl Mount {
    /// Create a mount description.
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }
}

/// Operations the core requires from an isolation runtime.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Start a new idle sandbox from `image` with `mount` attached.
    async fn create(&self, image: &str, mount: &Mount) -> Result<SandboxId, CoreError>;

    /// Start `command` inside the sandbox.
    ///
    /// The returned child must have piped stdout and stderr.
    async fn exec(&self, id: &SandboxId, command: &str) -> Result<Child, CoreError>;

    /// Forcibly terminate a process started by [`exec`](Self::exec) and reap it.
    async fn kill(&self, process: &mut Child) -> Result<(), CoreError> {
        // Already exited: start_kill reports InvalidInput, nothing to do
        if let Err(e) = process.start_kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(CoreError::Runtime(format!("kill failed: {e}")));
            }
        }
        process.wait().await?;
        Ok(())
    }

    /// Kill and remove the sandbox.
    async fn stop_and_remove(&self, id: &SandboxId) -> Result<(), CoreError>;
}

/// Runtime backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    run_args: Vec<String>,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    /// Create a runtime that invokes `binary` (usually `docker`).
    ///
    /// Containers are started without networking unless
    /// [`with_run_args`](Self::with_run_args) replaces the extra arguments.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            run_args: vec!["--network".to_string(), "none".to_string()],
        }
    }

    /// Replace the extra arguments passed to `docker run`.
    pub fn with_run_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Get the CLI binary.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check that the daemon answers, returning its version.
    pub async fn probe(&self) -> Result<String, CoreError> {
        self.output(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map_err(CoreError::Runtime)
    }

    fn run_command_args(&self, image: &str, mount: &Mount) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string(), "-t".to_string()];
        args.extend(self.run_args.iter().cloned());
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            mount.host_path.display(),
            mount.container_path
        ));
        args.push(image.to_string());
        args.push("/bin/bash".to_string());
        args
    }

    fn exec_command_args(id: &SandboxId, command: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            id.as_str().to_string(),
            "/bin/bash".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]
    }

    /// Run the CLI to completion, returning trimmed stdout or stderr on failure.
    async fn output<S: AsRef<std::ffi::OsStr>>(&self, args: &[S]) -> Result<String, String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.binary))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, image: &str, mount: &Mount) -> Result<SandboxId, CoreError> {
        let args = self.run_command_args(image, mount);
        tracing::debug!(image = %image, host_path = %mount.host_path.display(), "docker run");

        let id = self
            .output(args.as_slice())
            .await
            .map_err(|e| CoreError::Provisioning(format!("docker run failed: {e}")))?;

        if id.is_empty() {
            return Err(CoreError::Provisioning(
                "docker run returned no container id".into(),
            ));
        }
        Ok(SandboxId::new(id))
    }

    async fn exec(&self, id: &SandboxId, command: &str) -> Result<Child, CoreError> {
        tracing::trace!(sandbox_id = %id.short(), command = %command, "docker exec");
        Command::new(&self.binary)
            .args(Self::exec_command_args(id, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Runtime(format!("docker exec failed to start: {e}")))
    }

    async fn stop_and_remove(&self, id: &SandboxId) -> Result<(), CoreError> {
        match self.output(&["rm", "-f", id.as_str()]).await {
            Ok(_) => Ok(()),
            Err(e) if e.contains("No such container") => {
                tracing::debug!(sandbox_id = %id.short(), "Container already removed");
                Ok(())
            }
            Err(e) => Err(CoreError::Teardown(format!("docker rm failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_mount_workspace() {
        let runtime = DockerRuntime::default();
        let mount = Mount::new("/srv/runs/2024-01-01abc", "/home/code/source");
        let args = runtime.run_command_args("mono", &mount);

        assert_eq!(&args[..3], &["run", "-d", "-t"]);
        assert!(args.contains(&"none".to_string()));
        let v = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[v + 1], "/srv/runs/2024-01-01abc:/home/code/source");
        assert_eq!(args[args.len() - 2], "mono");
        assert_eq!(args[args.len() - 1], "/bin/bash");
    }

    #[test]
    fn test_run_args_override() {
        let runtime = DockerRuntime::new("podman").with_run_args(["--memory", "256m"]);
        let args = runtime.run_command_args("mono", &Mount::new("/a", "/b"));
        assert_eq!(runtime.binary(), "podman");
        assert!(args.contains(&"256m".to_string()));
        assert!(!args.contains(&"none".to_string()));
    }

    #[test]
    fn test_exec_args() {
        let args = DockerRuntime::exec_command_args(&SandboxId::new("abc"), "echo hi");
        assert_eq!(args, vec!["exec", "abc", "/bin/bash", "-c", "echo hi"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_provisioning_error() {
        let runtime = DockerRuntime::new("/nonexistent/docker-binary");
        let err = runtime
            .create("mono", &Mount::new("/tmp", "/home/code/source"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Provisioning(_)));
    }
}

//! Remote sandbox capability traits.
//!
//! A [`SandboxHandle`] represents one ephemeral compute environment
//! reachable by an opaque identifier. The orchestrator only needs four
//! things from it: run a command with a bound, run a command detached,
//! expose a network port as a URL, and close. A [`SandboxProvider`]
//! creates new handles or reattaches to existing ones by id.

mod docker;
mod error;
pub(crate) mod retry;

#[cfg(test)]
pub(crate) mod mock;

pub(crate) use docker::DockerProvider;
pub(crate) use error::SandboxError;

use async_trait::async_trait;
use std::time::Duration;

/// Captured output of a remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Returns true if the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One live remote execution environment.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// The provider-issued opaque identifier for this sandbox.
    fn id(&self) -> &str;

    /// Runs a shell command inside the sandbox, blocking until it finishes
    /// or the timeout elapses. A timeout surfaces as
    /// [`SandboxError::Timeout`], distinct from a non-zero exit.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, SandboxError>;

    /// Starts a shell command inside the sandbox without waiting for it.
    async fn exec_detached(&self, command: &str) -> Result<(), SandboxError>;

    /// Asks the provider for an externally reachable URL for the given
    /// sandbox port. `None` means the port is not exposed.
    async fn expose_port(&self, port: u16) -> Result<Option<String>, SandboxError>;

    /// Terminates the sandbox. Idempotent on the provider side.
    async fn close(&self) -> Result<(), SandboxError>;
}

/// Creates sandboxes and reattaches to existing ones.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provisions a fresh sandbox.
    async fn create(&self) -> Result<Box<dyn SandboxHandle>, SandboxError>;

    /// Reattaches to an existing sandbox by its opaque identifier.
    ///
    /// Fails with [`SandboxError::StaleHandle`] when the identifier no
    /// longer refers to a live sandbox (e.g. it was already reaped).
    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError>;
}

//! Domain-specific error types for remote sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings, and drive the retry
//! classification (timeouts and transport failures are retryable;
//! auth, not-found, and stale-handle failures are not).

use std::time::Duration;

/// Errors that can occur while driving a remote sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The sandbox backend is not running or not accessible.
    #[error("Sandbox backend is not available: {message}")]
    Unavailable { message: String },

    /// Creating a new sandbox failed.
    #[error("Failed to provision sandbox: {message}")]
    ProvisionFailed { message: String },

    /// The stored sandbox identifier no longer refers to a live sandbox.
    #[error("Sandbox {sandbox_id} no longer exists")]
    StaleHandle { sandbox_id: String },

    /// A remote command exceeded its configured timeout.
    #[error("Command timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// A remote command could not be started or its output could not be read.
    #[error("Command execution failed: {message}")]
    ExecFailed { message: String },

    /// A transient transport-level failure talking to the backend.
    #[error("Sandbox transport error: {message}")]
    Transport { message: String },
}

impl SandboxError {
    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a `ProvisionFailed` error.
    pub fn provision_failed(message: impl Into<String>) -> Self {
        Self::ProvisionFailed {
            message: message.into(),
        }
    }

    /// Creates a `StaleHandle` error.
    pub fn stale_handle(sandbox_id: impl Into<String>) -> Self {
        Self::StaleHandle {
            sandbox_id: sandbox_id.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `ExecFailed` error.
    pub fn exec_failed(message: impl Into<String>) -> Self {
        Self::ExecFailed {
            message: message.into(),
        }
    }

    /// Creates a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is a stale-handle error.
    pub fn is_stale_handle(&self) -> bool {
        matches!(self, Self::StaleHandle { .. })
    }

    /// Returns true if retrying the operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}

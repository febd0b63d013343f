//! Dependency bootstrap step.
//!
//! Best-effort by design: a project can exist with unresolved dependencies,
//! so install failures surface as warnings and never fail the operation.

use tracing::{debug, warn};

use crate::config::TimeoutConfig;
use crate::pipeline::clone_step::ProjectInfo;
use crate::sandbox::SandboxHandle;

/// What the bootstrap step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// No package manifest; no remote call was made.
    Skipped,
    /// Dependencies installed.
    Installed,
    /// Install failed or timed out; the operation proceeds anyway.
    Warning(String),
}

/// Installs dependencies when the project has a package manifest.
pub async fn run_bootstrap(
    handle: &dyn SandboxHandle,
    project_path: &str,
    info: &ProjectInfo,
    timeouts: &TimeoutConfig,
) -> BootstrapOutcome {
    if !info.has_package_json {
        debug!("No package manifest; skipping dependency install");
        return BootstrapOutcome::Skipped;
    }

    let command = format!("cd {} && npm install", shell_words::quote(project_path));
    match handle.exec(&command, timeouts.install_timeout()).await {
        Ok(output) if output.success() => BootstrapOutcome::Installed,
        Ok(output) => {
            let detail = output.stderr.lines().take(3).collect::<Vec<_>>().join("; ");
            warn!(detail = %detail, "Dependency install failed");
            BootstrapOutcome::Warning(format!("dependency install failed: {detail}"))
        }
        Err(e) if e.is_timeout() => {
            warn!("Dependency install timed out");
            BootstrapOutcome::Warning(format!(
                "dependency install timed out after {} seconds",
                timeouts.install_secs
            ))
        }
        Err(e) => {
            warn!(error = %e, "Dependency install could not run");
            BootstrapOutcome::Warning(format!("dependency install could not run: {e}"))
        }
    }
}

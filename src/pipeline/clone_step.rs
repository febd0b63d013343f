//! Git clone step.
//!
//! Builds an authenticated clone command, runs it inside the sandbox with a
//! hard timeout, then inspects the resulting tree. The clone exit code and
//! the post-clone inspection are independent checks; both must pass.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TimeoutConfig;
use crate::giturl::{AccessToken, GitUrl};
use crate::sandbox::SandboxHandle;

/// The directory walk stops after this many entries. The manifest is a
/// discovery aid, not an exhaustive listing.
pub const WALK_CAP: usize = 100;

/// At most this many entries are returned to the caller.
pub const TRANSPORT_CAP: usize = 50;

/// Transient summary of a cloned repository's layout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub file_count: usize,
    /// Truncated file manifest (first [`TRANSPORT_CAP`] entries).
    pub files: Vec<String>,
    pub has_package_json: bool,
    pub has_requirements_txt: bool,
    pub has_dockerfile: bool,
    pub has_readme: bool,
}

/// A failed clone, with a human-readable reason. The caller displays the
/// reason; it does not need to distinguish failure kinds programmatically.
#[derive(Debug, Clone)]
pub struct CloneFailure {
    pub reason: String,
}

impl CloneFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Clones the repository into `<workdir>/<target_dir>` and inspects it.
pub async fn run_clone(
    handle: &dyn SandboxHandle,
    workdir: &str,
    url: &GitUrl,
    branch: &str,
    token: Option<&AccessToken>,
    target_dir: &str,
    timeouts: &TimeoutConfig,
) -> Result<ProjectInfo, CloneFailure> {
    let target_path = format!("{}/{}", workdir.trim_end_matches('/'), target_dir);

    // The authenticated URL embeds the credential; only the redacted form
    // is ever logged.
    let clone_url = match token {
        Some(token) => url.authenticated_url(token),
        None => url.https_url(),
    };
    debug!(repository = %url, branch, "Cloning repository");

    let command = format!(
        "git clone --branch {} --single-branch {} {}",
        shell_words::quote(branch),
        shell_words::quote(&clone_url),
        shell_words::quote(&target_path),
    );

    let output = handle
        .exec(&command, timeouts.clone_timeout())
        .await
        .map_err(|e| {
            if e.is_timeout() {
                CloneFailure::new(format!(
                    "clone timed out after {} seconds",
                    timeouts.clone_secs
                ))
            } else {
                CloneFailure::new(format!("clone failed: {e}"))
            }
        })?;

    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(CloneFailure::new(format!("clone failed: {detail}")));
    }

    // Independent of the clone exit code: the target directory must exist.
    let check = handle
        .exec(
            &format!("test -d {}", shell_words::quote(&target_path)),
            timeouts.exec_timeout(),
        )
        .await
        .map_err(|e| CloneFailure::new(format!("post-clone inspection failed: {e}")))?;
    if !check.success() {
        return Err(CloneFailure::new(
            "clone reported success but the target directory is missing",
        ));
    }

    let info = inspect_tree(handle, &target_path, timeouts.exec_timeout()).await?;
    info!(
        repository = %url,
        files = info.file_count,
        has_package_json = info.has_package_json,
        "Clone complete"
    );
    Ok(info)
}

/// Walks the cloned tree (excluding `.git`) and derives manifest flags.
async fn inspect_tree(
    handle: &dyn SandboxHandle,
    target_path: &str,
    timeout: Duration,
) -> Result<ProjectInfo, CloneFailure> {
    let command = format!(
        "cd {} && find . -type f -not -path './.git/*' | head -{WALK_CAP}",
        shell_words::quote(target_path),
    );

    let output = handle
        .exec(&command, timeout)
        .await
        .map_err(|e| CloneFailure::new(format!("directory inspection failed: {e}")))?;
    if !output.success() {
        return Err(CloneFailure::new(format!(
            "directory inspection failed: {}",
            output.stderr.trim()
        )));
    }

    Ok(inspect_listing(&output.stdout))
}

/// Derives [`ProjectInfo`] from a newline-separated file listing.
pub fn inspect_listing(listing: &str) -> ProjectInfo {
    let entries: Vec<String> = listing
        .lines()
        .map(|l| l.trim().trim_start_matches("./").to_string())
        .filter(|l| !l.is_empty())
        .take(WALK_CAP)
        .collect();

    let root_entry = |name: &str| entries.iter().any(|e| e == name);
    let has_readme = entries
        .iter()
        .any(|e| !e.contains('/') && e.to_lowercase().starts_with("readme"));

    ProjectInfo {
        file_count: entries.len(),
        files: entries.iter().take(TRANSPORT_CAP).cloned().collect(),
        has_package_json: root_entry("package.json"),
        has_requirements_txt: root_entry("requirements.txt"),
        has_dockerfile: root_entry("Dockerfile"),
        has_readme,
    }
}

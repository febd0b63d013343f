//! Sandbox lifecycle orchestration.
//!
//! One request runs as a sequential pipeline: validate, provision (or
//! reattach), clone, bootstrap, launch, record. Each step blocks with its
//! own timeout; clone failures abort and release the sandbox, bootstrap and
//! launch failures degrade to warnings in the response. Sandbox identity is
//! an explicit value threaded through every operation, never ambient state.

pub(crate) mod bootstrap_step;
pub(crate) mod clone_step;
pub(crate) mod launch_step;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::giturl::{AccessToken, GitUrl, GitUrlError};
use crate::sandbox::retry::{with_retry, RetryPolicy};
use crate::sandbox::{SandboxError, SandboxHandle, SandboxProvider};
use crate::store::{NewRecord, RecordStore, SandboxRecord, SandboxStatus, StoreError};

use bootstrap_step::{run_bootstrap, BootstrapOutcome};
use clone_step::{run_clone, ProjectInfo};
use launch_step::{run_launch, LaunchOutcome, ReadinessProbe};

/// Errors surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed input; rejected before any remote call.
    #[error("{0}")]
    Validation(String),

    /// Another pipeline is already operating on this sandbox.
    #[error("sandbox {sandbox_id} already has an operation in flight")]
    Busy { sandbox_id: String },

    /// Sandbox creation or reattachment failed.
    #[error("sandbox provisioning failed: {0}")]
    Provision(#[source] SandboxError),

    /// The clone command failed, timed out, or the tree was uninspectable.
    #[error("{reason}")]
    CloneFailed { reason: String },

    /// A record store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GitUrlError> for OrchestratorError {
    fn from(e: GitUrlError) -> Self {
        Self::Validation(e.to_string())
    }
}

/// A clone-and-bootstrap request, as received from the caller.
#[derive(Debug, Clone, Default)]
pub struct CloneRequest {
    pub git_url: String,
    pub branch: Option<String>,
    pub project_name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub access_token: Option<String>,
    /// Reuse an existing sandbox instead of creating one.
    pub sandbox_id: Option<String>,
}

struct ValidatedRequest {
    url: GitUrl,
    branch: String,
    project_name: String,
    token: Option<AccessToken>,
    sandbox_id: Option<String>,
}

impl CloneRequest {
    fn validate(self) -> Result<ValidatedRequest, OrchestratorError> {
        let url = GitUrl::parse(&self.git_url)?;

        let project_name = self.project_name.trim().to_string();
        if project_name.is_empty() {
            return Err(OrchestratorError::Validation(
                "project name must not be empty".to_string(),
            ));
        }

        let token = self.access_token.filter(|t| !t.is_empty()).map(AccessToken::new);
        if self.is_private && token.is_none() {
            return Err(OrchestratorError::Validation(
                "private repositories require an access token".to_string(),
            ));
        }
        // Credentials apply to private repositories only; a public clone is
        // always anonymous.
        let token = if self.is_private { token } else { None };

        let branch = match self.branch.filter(|b| !b.trim().is_empty()) {
            Some(b) => b.trim().to_string(),
            None => "main".to_string(),
        };

        Ok(ValidatedRequest {
            url,
            branch,
            project_name,
            token,
            sandbox_id: self.sandbox_id,
        })
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub sandbox_id: String,
    pub project_name: String,
    pub project_info: ProjectInfo,
    pub server_url: Option<String>,
    pub message: String,
}

/// Per-sandbox advisory lock: a second pipeline targeting an id already
/// mid-pipeline is rejected rather than raced.
#[derive(Clone, Default)]
struct InflightLocks {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InflightLocks {
    fn try_acquire(&self, sandbox_id: &str) -> Option<InflightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(sandbox_id.to_string()) {
            return None;
        }
        Some(InflightGuard {
            sandbox_id: sandbox_id.to_string(),
            ids: Arc::clone(&self.ids),
        })
    }
}

struct InflightGuard {
    sandbox_id: String,
    ids: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.sandbox_id);
    }
}

/// Drives the clone/bootstrap/launch pipeline and keeps the record store
/// consistent with observed remote reality.
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn SandboxProvider>,
    probe: Arc<dyn ReadinessProbe>,
    config: Config,
    inflight: InflightLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn SandboxProvider>,
        probe: Arc<dyn ReadinessProbe>,
        config: Config,
    ) -> Self {
        Self {
            store,
            provider,
            probe,
            config,
            inflight: InflightLocks::default(),
        }
    }

    /// Runs the full pipeline for one request.
    pub async fn clone_and_start(
        &self,
        owner_id: &str,
        request: CloneRequest,
    ) -> Result<CloneOutcome, OrchestratorError> {
        let validated = request.validate()?;
        info!(
            event = "pipeline_start",
            repository = %validated.url,
            branch = %validated.branch,
            reuse = validated.sandbox_id.is_some(),
        );

        let (handle, _guard) = match &validated.sandbox_id {
            Some(id) => {
                let guard = self
                    .inflight
                    .try_acquire(id)
                    .ok_or_else(|| OrchestratorError::Busy {
                        sandbox_id: id.clone(),
                    })?;
                let handle = self.reattach(id).await?;
                // Every user-observable interaction keeps the sandbox alive.
                self.store.touch(id).await?;
                (handle, guard)
            }
            None => {
                let handle = with_retry(RetryPolicy::default(), || self.provider.create())
                    .await
                    .map_err(OrchestratorError::Provision)?;
                let Some(guard) = self.inflight.try_acquire(handle.id()) else {
                    let sandbox_id = handle.id().to_string();
                    self.release(handle.as_ref()).await;
                    return Err(OrchestratorError::Busy { sandbox_id });
                };
                // The sandbox exists remotely from here on; any failure
                // before the record does must release it.
                if let Err(e) = self
                    .store
                    .create(NewRecord {
                        owner_id: owner_id.to_string(),
                        sandbox_id: handle.id().to_string(),
                        name: validated.project_name.clone(),
                        project_id: None,
                        is_temporary: false,
                    })
                    .await
                {
                    self.release(handle.as_ref()).await;
                    return Err(e.into());
                }
                (handle, guard)
            }
        };
        let sandbox_id = handle.id().to_string();

        let project_info = match run_clone(
            handle.as_ref(),
            &self.config.sandbox.workdir,
            &validated.url,
            &validated.branch,
            validated.token.as_ref(),
            &validated.project_name,
            &self.config.timeouts,
        )
        .await
        {
            Ok(info) => info,
            Err(failure) => {
                self.abandon(handle.as_ref(), &failure.reason).await;
                return Err(OrchestratorError::CloneFailed {
                    reason: failure.reason,
                });
            }
        };

        let project_path = format!(
            "{}/{}",
            self.config.sandbox.workdir.trim_end_matches('/'),
            validated.project_name
        );

        let bootstrap = run_bootstrap(
            handle.as_ref(),
            &project_path,
            &project_info,
            &self.config.timeouts,
        )
        .await;

        let launch = run_launch(
            handle.as_ref(),
            &project_path,
            &project_info,
            &self.config.sandbox,
            &self.config.timeouts,
            self.probe.as_ref(),
        )
        .await;

        let server_url = launch.url().map(String::from);
        self.store
            .set_status(&sandbox_id, SandboxStatus::Running, server_url.clone())
            .await?;

        let message = build_message(&validated.url, &bootstrap, &launch);
        info!(
            event = "pipeline_complete",
            sandbox_id = %sandbox_id,
            server_url = server_url.as_deref().unwrap_or("-"),
        );

        Ok(CloneOutcome {
            sandbox_id,
            project_name: validated.project_name,
            project_info,
            server_url,
            message,
        })
    }

    /// Reattaches to an existing sandbox, reconciling the record when the
    /// remote identifier turns out to be stale.
    async fn reattach(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, OrchestratorError> {
        match self.provider.connect(sandbox_id).await {
            Ok(handle) => Ok(handle),
            Err(e) if e.is_stale_handle() => {
                warn!(sandbox_id, "Stored sandbox id is stale; marking record as errored");
                if let Err(store_err) = self
                    .store
                    .set_status(sandbox_id, SandboxStatus::Error, None)
                    .await
                {
                    if !store_err.is_not_found() {
                        error!(sandbox_id, error = %store_err, "Failed to mark stale sandbox");
                    }
                }
                Err(OrchestratorError::Provision(e))
            }
            Err(e) => Err(OrchestratorError::Provision(e)),
        }
    }

    /// Closes a sandbox that never made it into the pipeline.
    async fn release(&self, handle: &dyn SandboxHandle) {
        if let Err(e) = handle.close().await {
            warn!(sandbox_id = handle.id(), error = %e, "Failed to close sandbox");
        }
    }

    /// Releases the sandbox and records the failure after an aborted clone.
    async fn abandon(&self, handle: &dyn SandboxHandle, reason: &str) {
        warn!(sandbox_id = handle.id(), reason, "Abandoning sandbox after failed clone");
        if let Err(e) = handle.close().await {
            warn!(sandbox_id = handle.id(), error = %e, "Failed to close sandbox");
        }
        if let Err(e) = self
            .store
            .set_status(handle.id(), SandboxStatus::Error, None)
            .await
        {
            error!(sandbox_id = handle.id(), error = %e, "Failed to record clone failure");
        }
    }

    /// Keep-alive: pushes the auto-stop deadline out by the grace window.
    pub async fn touch(&self, sandbox_id: &str) -> Result<SandboxRecord, OrchestratorError> {
        Ok(self.store.touch(sandbox_id).await?)
    }

    /// Fetches the record for a sandbox.
    pub async fn get(&self, sandbox_id: &str) -> Result<SandboxRecord, OrchestratorError> {
        Ok(self.store.get(sandbox_id).await?)
    }

    /// Explicit user stop: close the remote sandbox (best-effort) and mark
    /// the record stopped. Idempotent on terminal records.
    pub async fn stop(&self, sandbox_id: &str) -> Result<SandboxRecord, OrchestratorError> {
        let record = self.store.get(sandbox_id).await?;
        if matches!(record.status, SandboxStatus::Stopped | SandboxStatus::Error) {
            return Ok(record);
        }

        match self.provider.connect(sandbox_id).await {
            Ok(handle) => {
                if let Err(e) = handle.close().await {
                    warn!(sandbox_id, error = %e, "Failed to close sandbox on stop");
                }
            }
            Err(e) => {
                warn!(sandbox_id, error = %e, "Could not reattach to sandbox on stop");
            }
        }

        Ok(self
            .store
            .set_status(sandbox_id, SandboxStatus::Stopped, None)
            .await?)
    }

    /// Stops the sandbox and deletes its record, cascading to dependent rows.
    pub async fn remove(&self, sandbox_id: &str) -> Result<(), OrchestratorError> {
        if let Err(e) = self.stop(sandbox_id).await {
            // Deletion proceeds even when the stop half fails; a missing
            // record is still a hard error.
            match &e {
                OrchestratorError::Store(se) if se.is_not_found() => return Err(e),
                _ => warn!(sandbox_id, error = %e, "Stop before delete failed"),
            }
        }
        Ok(self.store.delete(sandbox_id).await?)
    }
}

fn build_message(url: &GitUrl, bootstrap: &BootstrapOutcome, launch: &LaunchOutcome) -> String {
    let mut message = format!("Repository {url} cloned successfully");

    match bootstrap {
        BootstrapOutcome::Installed => message.push_str("; dependencies installed"),
        BootstrapOutcome::Skipped => {}
        BootstrapOutcome::Warning(w) => {
            message.push_str("; ");
            message.push_str(w);
        }
    }

    match launch {
        LaunchOutcome::Started { url } => {
            message.push_str(&format!("; dev server running at {url}"));
        }
        LaunchOutcome::NoServer => message.push_str("; no dev server started"),
        LaunchOutcome::Warning(w) => {
            message.push_str("; ");
            message.push_str(w);
        }
    }

    message
}

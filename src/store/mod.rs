//! Lifecycle record store.
//!
//! A [`SandboxRecord`] is the durable view of one remote sandbox. It can
//! diverge from remote truth (the sandbox may die or time out on its own),
//! so records are keyed by the provider-issued `sandbox_id` - the provider
//! is the source of identity truth - and reconciled by the orchestrator
//! and the idle reaper.

mod memory;

pub(crate) use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a sandbox is in its lifecycle.
///
/// Transitions only move forward (`Creating -> Running -> Stopped`);
/// `Error` is terminal and reachable from any live state. Nothing leaves
/// `Stopped` or `Error` - a dead sandbox gets a new record, not a revival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl SandboxStatus {
    /// Returns true if the state machine permits moving to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Creating, Self::Running | Self::Stopped | Self::Error) => true,
            (Self::Running, Self::Stopped | Self::Error) => true,
            (Self::Stopped | Self::Error, _) => false,
            _ => false,
        }
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Durable record tracking one provisioned sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRecord {
    /// Internal record id.
    pub id: Uuid,
    /// Provider-issued opaque identifier; globally unique, and the only key
    /// the reaper and activity tracking use to locate a record.
    pub sandbox_id: String,
    /// Exclusive owner.
    pub owner_id: String,
    /// Weak reference; a sandbox may exist without a project.
    pub project_id: Option<String>,
    /// Display name.
    pub name: String,
    pub status: SandboxStatus,
    /// Externally reachable address, set once a server is confirmed reachable.
    pub url: Option<String>,
    /// Immutable, set at creation.
    pub started_at: DateTime<Utc>,
    /// Updated on every observed activity.
    pub last_active_at: DateTime<Utc>,
    /// Deadline after which the idle reaper may reclaim the sandbox.
    pub auto_stop_at: DateTime<Utc>,
    /// Throwaway sandbox, not tied to a saved project.
    pub is_temporary: bool,
}

impl SandboxRecord {
    /// Records observed activity: `last_active_at` and `auto_stop_at` are
    /// always re-derived together, never independently.
    pub fn mark_active(&mut self, now: DateTime<Utc>, grace: Duration) {
        self.last_active_at = now;
        self.auto_stop_at = now + grace;
    }

    /// Whether the reaper may reclaim this sandbox at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SandboxStatus::Running && self.auto_stop_at < now
    }
}

/// Fields required to create a record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub owner_id: String,
    pub sandbox_id: String,
    pub name: String,
    pub project_id: Option<String>,
    pub is_temporary: bool,
}

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record matches the given sandbox id.
    #[error("no sandbox record for id {sandbox_id}")]
    NotFound { sandbox_id: String },

    /// A record with this sandbox id already exists.
    #[error("sandbox record for id {sandbox_id} already exists")]
    Duplicate { sandbox_id: String },

    /// The requested status change violates the state machine.
    #[error("cannot transition sandbox {sandbox_id} from {from} to {to}")]
    InvalidTransition {
        sandbox_id: String,
        from: SandboxStatus,
        to: SandboxStatus,
    },
}

impl StoreError {
    pub fn not_found(sandbox_id: impl Into<String>) -> Self {
        Self::NotFound {
            sandbox_id: sandbox_id.into(),
        }
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Operations the orchestrator and reaper need from the store.
///
/// All keyed operations use the provider-issued sandbox id, never the
/// internal record id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates a record in `Creating` status with `auto_stop_at` derived
    /// from the grace window.
    async fn create(&self, new: NewRecord) -> Result<SandboxRecord, StoreError>;

    /// Fetches a record by sandbox id.
    async fn get(&self, sandbox_id: &str) -> Result<SandboxRecord, StoreError>;

    /// Moves a record to `status`, optionally setting its URL. Counts as
    /// observed activity.
    async fn set_status(
        &self,
        sandbox_id: &str,
        status: SandboxStatus,
        url: Option<String>,
    ) -> Result<SandboxRecord, StoreError>;

    /// Records activity, pushing the auto-stop deadline out by the grace
    /// window. Must be called on every user-observable interaction.
    async fn touch(&self, sandbox_id: &str) -> Result<SandboxRecord, StoreError>;

    /// All records still marked `Running` whose deadline has passed.
    /// Used exclusively by the idle reaper.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<SandboxRecord>, StoreError>;

    /// Deletes a record and its dependent snapshot and chat-history rows,
    /// children first.
    async fn delete(&self, sandbox_id: &str) -> Result<(), StoreError>;
}

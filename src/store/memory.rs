//! In-memory record store.
//!
//! Single-node backend behind the [`RecordStore`] seam. Snapshot and
//! chat-history rows reference the parent record's internal id and are
//! cascade-deleted with it, children first; orphaned children (from a
//! cascade that failed mid-way in a durable backend) carry the
//! back-reference and are filtered out on read.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{NewRecord, RecordStore, SandboxRecord, SandboxStatus, StoreError};

/// A filesystem snapshot attached to a sandbox record.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub record_id: Uuid,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// One chat message attached to a sandbox record.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: Uuid,
    pub record_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    records: HashMap<String, SandboxRecord>,
    snapshots: Vec<SnapshotRow>,
    chats: Vec<ChatRow>,
}

/// `RwLock`-protected tables keyed by sandbox id.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    grace: Duration,
}

impl MemoryStore {
    /// Creates an empty store with the given idle grace window.
    pub fn new(grace: Duration) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            grace,
        }
    }

    /// Attaches a snapshot row to an existing record.
    pub async fn add_snapshot(&self, sandbox_id: &str, label: &str) -> Result<Uuid, StoreError> {
        let mut tables = self.tables.write().await;
        let record_id = tables
            .records
            .get(sandbox_id)
            .ok_or_else(|| StoreError::not_found(sandbox_id))?
            .id;
        let row = SnapshotRow {
            id: Uuid::new_v4(),
            record_id,
            label: label.to_string(),
            created_at: Utc::now(),
        };
        let id = row.id;
        tables.snapshots.push(row);
        Ok(id)
    }

    /// Attaches a chat message to an existing record.
    pub async fn add_chat_message(&self, sandbox_id: &str, body: &str) -> Result<Uuid, StoreError> {
        let mut tables = self.tables.write().await;
        let record_id = tables
            .records
            .get(sandbox_id)
            .ok_or_else(|| StoreError::not_found(sandbox_id))?
            .id;
        let row = ChatRow {
            id: Uuid::new_v4(),
            record_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        let id = row.id;
        tables.chats.push(row);
        Ok(id)
    }

    /// Snapshots for a record, filtering rows whose parent is gone.
    pub async fn snapshots_for(&self, sandbox_id: &str) -> Vec<SnapshotRow> {
        let tables = self.tables.read().await;
        let Some(record) = tables.records.get(sandbox_id) else {
            return Vec::new();
        };
        tables
            .snapshots
            .iter()
            .filter(|s| s.record_id == record.id)
            .cloned()
            .collect()
    }

    /// Total snapshot rows, including orphans. Test aid.
    #[cfg(test)]
    pub async fn snapshot_row_count(&self) -> usize {
        self.tables.read().await.snapshots.len()
    }

    #[cfg(test)]
    pub async fn chat_row_count(&self) -> usize {
        self.tables.read().await.chats.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, new: NewRecord) -> Result<SandboxRecord, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.records.contains_key(&new.sandbox_id) {
            return Err(StoreError::Duplicate {
                sandbox_id: new.sandbox_id,
            });
        }

        let now = Utc::now();
        let record = SandboxRecord {
            id: Uuid::new_v4(),
            sandbox_id: new.sandbox_id.clone(),
            owner_id: new.owner_id,
            project_id: new.project_id,
            name: new.name,
            status: SandboxStatus::Creating,
            url: None,
            started_at: now,
            last_active_at: now,
            auto_stop_at: now + self.grace,
            is_temporary: new.is_temporary,
        };
        tables.records.insert(new.sandbox_id, record.clone());
        Ok(record)
    }

    async fn get(&self, sandbox_id: &str) -> Result<SandboxRecord, StoreError> {
        let tables = self.tables.read().await;
        tables
            .records
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(sandbox_id))
    }

    async fn set_status(
        &self,
        sandbox_id: &str,
        status: SandboxStatus,
        url: Option<String>,
    ) -> Result<SandboxRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let grace = self.grace;
        let record = tables
            .records
            .get_mut(sandbox_id)
            .ok_or_else(|| StoreError::not_found(sandbox_id))?;

        // Re-asserting the current status is an activity update, not a
        // transition.
        if record.status != status && !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                sandbox_id: sandbox_id.to_string(),
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        if let Some(url) = url {
            record.url = Some(url);
        }
        record.mark_active(Utc::now(), grace);
        Ok(record.clone())
    }

    async fn touch(&self, sandbox_id: &str) -> Result<SandboxRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let grace = self.grace;
        let record = tables
            .records
            .get_mut(sandbox_id)
            .ok_or_else(|| StoreError::not_found(sandbox_id))?;
        record.mark_active(Utc::now(), grace);
        Ok(record.clone())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<SandboxRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete(&self, sandbox_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let record_id = tables
            .records
            .get(sandbox_id)
            .ok_or_else(|| StoreError::not_found(sandbox_id))?
            .id;

        // Children first, then the parent.
        tables.snapshots.retain(|s| s.record_id != record_id);
        tables.chats.retain(|c| c.record_id != record_id);
        tables.records.remove(sandbox_id);
        Ok(())
    }
}

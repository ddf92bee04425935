use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Persisted state of one live migration attempt. Owned by the caller; the
/// monitor only writes progress counters and status into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub source_host: String,
    pub destination_host: String,
    pub status: MigrationStatus,
    pub memory_total: u64,
    pub memory_processed: u64,
    pub memory_remaining: u64,
    pub disk_total: u64,
    pub disk_processed: u64,
    pub disk_remaining: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl MigrationRecord {
    pub fn new(instance_id: Uuid, source_host: String, destination_host: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instance_id,
            source_host,
            destination_host,
            status: MigrationStatus::Queued,
            memory_total: 0,
            memory_processed: 0,
            memory_remaining: 0,
            disk_total: 0,
            disk_processed: 0,
            disk_remaining: 0,
            started_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn update_status(&mut self, status: MigrationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.error_message = Some(error.to_string());
        self.update_status(MigrationStatus::Failed);
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }
}

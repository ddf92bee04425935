use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The guest being migrated, as the rest of the system sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    /// Coarse completion percentage. Not clamped: whatever the hypervisor
    /// counters imply is stored as-is.
    pub progress: i64,
    pub last_updated: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(name: String, host: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            host,
            progress: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn set_progress(&mut self, progress: i64) {
        self.progress = progress;
        self.last_updated = Utc::now();
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}

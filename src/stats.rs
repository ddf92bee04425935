use crate::Result;
use crate::instance::InstanceRecord;
use crate::migration::MigrationRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobType {
    /// No job is running; the hypervisor cannot say whether one finished.
    #[default]
    None,
    Bounded,
    Unbounded,
    Completed,
    Failed,
    Cancelled,
}

/// One poll of the hypervisor's migration job counters, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_type: JobType,
    pub memory_total: u64,
    pub memory_processed: u64,
    pub memory_remaining: u64,
    pub disk_total: u64,
    pub disk_processed: u64,
    pub disk_remaining: u64,
}

impl JobInfo {
    pub fn data_remaining(&self) -> u64 {
        self.memory_remaining + self.disk_remaining
    }

    pub fn data_total(&self) -> u64 {
        self.memory_total + self.disk_total
    }
}

/// Percentage of guest memory still to copy, 100 while the total is unknown.
pub fn remaining_percent(info: &JobInfo) -> i64 {
    if info.memory_total == 0 {
        return 100;
    }
    (info.memory_remaining as f64 * 100.0 / info.memory_total as f64).round() as i64
}

/// Persists migration and instance records.
pub trait RecordStore {
    fn save_migration(&self, record: &MigrationRecord) -> Result<()>;
    fn save_instance(&self, record: &InstanceRecord) -> Result<()>;
}

#[derive(Debug)]
pub struct StatsOutcome {
    pub migration_saved: Result<()>,
    pub instance_saved: Result<()>,
}

impl StatsOutcome {
    pub fn is_ok(&self) -> bool {
        self.migration_saved.is_ok() && self.instance_saved.is_ok()
    }
}

/// Copy the job counters into `migration` and the coarse progress into
/// `instance`, saving each. A failed save does not stop the other one.
pub fn record<S: RecordStore + ?Sized>(
    migration: &mut MigrationRecord,
    instance: &mut InstanceRecord,
    info: &JobInfo,
    remaining: i64,
    store: &S,
) -> StatsOutcome {
    migration.memory_total = info.memory_total;
    migration.memory_processed = info.memory_processed;
    migration.memory_remaining = info.memory_remaining;
    migration.disk_total = info.disk_total;
    migration.disk_processed = info.disk_processed;
    migration.disk_remaining = info.disk_remaining;
    let migration_saved = store.save_migration(migration);

    instance.set_progress(100 - remaining);
    let instance_saved = store.save_instance(instance);

    StatsOutcome {
        migration_saved,
        instance_saved,
    }
}

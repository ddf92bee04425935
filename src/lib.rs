pub mod abort;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod downtime;
pub mod error;
pub mod instance;
pub mod logger;
pub mod migration;
pub mod monitor;
pub mod outcome;
pub mod patcher;
pub mod provider;
pub mod stats;

pub use error::{HypervisorError, NovaError};
pub use instance::InstanceRecord;
pub use migration::{MigrationRecord, MigrationStatus};

pub type Result<T> = std::result::Result<T, NovaError>;

// Convenience re-exports for the migration control path
pub use abort::{AbortReason, should_abort};
pub use context::{BlockDeviceMapping, MigrationContext};
pub use descriptor::{DeviceDescriptorTree, Element};
pub use downtime::{DowntimeControl, DowntimeStep};
pub use monitor::{MigrationMonitor, MonitorStatus, Tick};
pub use outcome::{GuestQuery, MigrationOutcome};
pub use provider::DestinationDiskProvider;
pub use stats::{JobInfo, JobType, RecordStore};

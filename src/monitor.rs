//! One iteration of the live migration monitoring loop.
//!
//! The caller polls the hypervisor for [`JobInfo`] on its own cadence and
//! feeds each snapshot to [`MigrationMonitor::tick`]. The monitor keeps the
//! progress watermark and current downtime between ticks, runs the abort,
//! downtime and stats steps, and logs what they decided. It never aborts
//! the job itself: [`MonitorStatus::AbortRequested`] tells the caller to.

use crate::abort::{AbortCheck, AbortReason};
use crate::config::LiveMigrationSettings;
use crate::downtime::{self, DowntimeControl, DowntimeEvent, DowntimeStep};
use crate::instance::InstanceRecord;
use crate::migration::{MigrationRecord, MigrationStatus};
use crate::outcome::{self, GuestQuery, MigrationOutcome, ResolutionReason};
use crate::stats::{self, JobInfo, JobType, RecordStore};
use crate::{log_debug, log_info, log_warn};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Running,
    AbortRequested(AbortReason),
    Completed,
    Failed,
    Cancelled,
}

impl MonitorStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            MonitorStatus::Completed | MonitorStatus::Failed | MonitorStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub info: JobInfo,
    pub now: DateTime<Utc>,
    /// Whether the call that started the migration has returned. Until it
    /// has, "no job" just means the job has not been created yet.
    pub operation_finished: bool,
}

pub struct MigrationMonitor {
    settings: LiveMigrationSettings,
    steps: Vec<DowntimeStep>,
    completion_timeout: u64,
    started_at: DateTime<Utc>,
    progress_time: DateTime<Utc>,
    progress_watermark: Option<u64>,
    downtime: Option<u64>,
    ticks: u64,
}

impl MigrationMonitor {
    /// `data_gb` is the guest's RAM plus disk size, see [`crate::config::data_gb`].
    pub fn new(settings: &LiveMigrationSettings, data_gb: f64, started_at: DateTime<Utc>) -> Self {
        let (settings, warnings) = settings.normalized();
        for warning in warnings {
            log_warn!("{}", warning);
        }

        let steps = downtime::downtime_steps(&settings, data_gb);
        let completion_timeout = settings.completion_timeout_for(data_gb);
        log_debug!(
            "Migration of {:.1} GiB: completion timeout {}s, {} downtime steps",
            data_gb,
            completion_timeout,
            steps.len()
        );

        Self {
            settings,
            steps,
            completion_timeout,
            started_at,
            progress_time: started_at,
            progress_watermark: None,
            downtime: None,
            ticks: 0,
        }
    }

    pub fn downtime(&self) -> Option<u64> {
        self.downtime
    }

    pub fn downtime_steps(&self) -> &[DowntimeStep] {
        &self.steps
    }

    pub fn progress_time(&self) -> DateTime<Utc> {
        self.progress_time
    }

    pub fn tick<G, S>(
        &mut self,
        tick: Tick,
        guest: &G,
        store: &S,
        migration: &mut MigrationRecord,
        instance: &mut InstanceRecord,
    ) -> MonitorStatus
    where
        G: GuestQuery + DowntimeControl + ?Sized,
        S: RecordStore + ?Sized,
    {
        let job_type = match tick.info.job_type {
            JobType::None if !tick.operation_finished => JobType::Unbounded,
            JobType::None => self.resolve_finished_job(guest, instance),
            other => other,
        };

        match job_type {
            JobType::Completed => {
                log_info!("Migration of {} completed", instance.display_name());
                migration.update_status(MigrationStatus::Completed);
                MonitorStatus::Completed
            }
            JobType::Failed => {
                log_warn!("Migration of {} failed", instance.display_name());
                migration.mark_failed("live migration failed");
                MonitorStatus::Failed
            }
            JobType::Cancelled => {
                log_info!("Migration of {} was cancelled", instance.display_name());
                migration.update_status(MigrationStatus::Cancelled);
                MonitorStatus::Cancelled
            }
            JobType::None | JobType::Bounded | JobType::Unbounded => {
                self.track_running(&tick, guest, store, migration, instance)
            }
        }
    }

    fn resolve_finished_job<G>(&self, guest: &G, instance: &InstanceRecord) -> JobType
    where
        G: GuestQuery + ?Sized,
    {
        let resolution = outcome::resolve(guest);
        let name = instance.display_name();
        match &resolution.reason {
            ResolutionReason::GuestStillActive => {
                log_debug!("VM {} running on src, migration failed", name)
            }
            ResolutionReason::GuestShutOff => {
                log_debug!("VM {} is shutoff, migration finished", name)
            }
            ResolutionReason::GuestMissing => {
                log_debug!("VM {} is missing, migration finished", name)
            }
            ResolutionReason::QueryFailed(err) => {
                log_info!("Error {} checking {}, migration failed", err, name)
            }
        }

        match resolution.outcome {
            MigrationOutcome::Completed => JobType::Completed,
            MigrationOutcome::Failed => JobType::Failed,
        }
    }

    fn track_running<G, S>(
        &mut self,
        tick: &Tick,
        guest: &G,
        store: &S,
        migration: &mut MigrationRecord,
        instance: &mut InstanceRecord,
    ) -> MonitorStatus
    where
        G: DowntimeControl + ?Sized,
        S: RecordStore + ?Sized,
    {
        if migration.status == MigrationStatus::Queued {
            migration.update_status(MigrationStatus::Running);
        }

        let elapsed = tick
            .now
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64;

        // Any drop in outstanding data counts as progress. A zero watermark
        // means counters were not populated yet.
        let remaining = tick.info.data_remaining();
        if self
            .progress_watermark
            .is_none_or(|watermark| watermark == 0 || watermark > remaining)
        {
            self.progress_watermark = Some(remaining);
            self.progress_time = tick.now;
        }

        let check = AbortCheck {
            now: tick.now.timestamp(),
            progress_time: self.progress_time.timestamp(),
            progress_timeout: self.settings.progress_timeout,
            elapsed,
            completion_timeout: self.completion_timeout,
        };
        if let Some(reason) = check.reason() {
            log_warn!("{} for {}", reason, instance.display_name());
            return MonitorStatus::AbortRequested(reason);
        }

        let update = downtime::advance(self.downtime, &self.steps, elapsed, guest);
        log_downtime_event(&update.event, instance);
        self.downtime = update.downtime;

        if self.ticks % self.settings.stats_interval == 0 {
            self.save_stats(tick, elapsed, store, migration, instance);
        }
        self.ticks += 1;

        MonitorStatus::Running
    }

    fn save_stats<S>(
        &self,
        tick: &Tick,
        elapsed: u64,
        store: &S,
        migration: &mut MigrationRecord,
        instance: &mut InstanceRecord,
    ) where
        S: RecordStore + ?Sized,
    {
        let info = &tick.info;
        let remaining = stats::remaining_percent(info);
        let outcome = stats::record(migration, instance, info, remaining, store);
        if let Err(err) = &outcome.migration_saved {
            log_warn!("Unable to save migration stats: {}", err);
        }
        if let Err(err) = &outcome.instance_saved {
            log_warn!("Unable to save progress of {}: {}", instance.display_name(), err);
        }

        let mib = |bytes: u64| bytes / (1024 * 1024);
        let message = format!(
            "Migration running for {} secs, memory {}% remaining; \
             (bytes processed={}, remaining={}, total={})",
            elapsed,
            remaining,
            mib(info.data_total().saturating_sub(info.data_remaining())),
            mib(info.data_remaining()),
            mib(info.data_total()),
        );
        if self.ticks % self.settings.info_log_interval == 0 {
            log_info!("{}: {}", instance.display_name(), message);
        } else {
            log_debug!("{}: {}", instance.display_name(), message);
        }
    }
}

fn log_downtime_event(event: &DowntimeEvent, instance: &InstanceRecord) {
    let name = instance.display_name();
    match event {
        DowntimeEvent::NoCurrentStep => log_debug!("No current downtime step for {}", name),
        DowntimeEvent::Unchanged => log_debug!("Downtime of {} does not need to change", name),
        DowntimeEvent::Increased {
            downtime_ms,
            threshold_secs,
        } => log_info!(
            "Increasing downtime of {} to {} ms after {} sec elapsed time",
            name,
            downtime_ms,
            threshold_secs
        ),
        DowntimeEvent::ApplyFailed {
            downtime_ms, error, ..
        } => log_warn!(
            "Unable to increase max downtime of {} to {}ms: {}",
            name,
            downtime_ms,
            error
        ),
    }
}

//! Adaptive max-downtime escalation.
//!
//! A step table maps elapsed migration time to the downtime the guest may
//! be paused for during final cutover. The longer a migration runs, the
//! larger the allowed pause, so a guest that dirties memory quickly can
//! still converge.

use crate::config::LiveMigrationSettings;
use crate::error::HypervisorError;
use crate::{NovaError, Result};
use serde::{Deserialize, Serialize};

/// Lets the scheduler change the running job's max downtime.
pub trait DowntimeControl {
    fn configure_max_downtime(&self, downtime_ms: u64) -> std::result::Result<(), HypervisorError>;
}

impl<F> DowntimeControl for F
where
    F: Fn(u64) -> std::result::Result<(), HypervisorError>,
{
    fn configure_max_downtime(&self, downtime_ms: u64) -> std::result::Result<(), HypervisorError> {
        self(downtime_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeStep {
    pub threshold_secs: u64,
    pub downtime_ms: u64,
}

impl DowntimeStep {
    pub const fn new(threshold_secs: u64, downtime_ms: u64) -> Self {
        Self {
            threshold_secs,
            downtime_ms,
        }
    }
}

impl From<(u64, u64)> for DowntimeStep {
    fn from((threshold_secs, downtime_ms): (u64, u64)) -> Self {
        Self::new(threshold_secs, downtime_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DowntimeEvent {
    NoCurrentStep,
    Unchanged,
    Increased {
        downtime_ms: u64,
        threshold_secs: u64,
    },
    /// The new value is tracked anyway; it is not re-sent on later ticks.
    ApplyFailed {
        downtime_ms: u64,
        threshold_secs: u64,
        error: HypervisorError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowntimeUpdate {
    pub downtime: Option<u64>,
    pub event: DowntimeEvent,
}

/// Steps must be sorted by threshold; the last step whose threshold is
/// strictly below `elapsed` wins.
pub fn validate_steps(steps: &[DowntimeStep]) -> Result<()> {
    for (index, pair) in steps.windows(2).enumerate() {
        if pair[1].threshold_secs < pair[0].threshold_secs {
            return Err(NovaError::UnsortedDowntimeSteps { index: index + 1 });
        }
    }
    Ok(())
}

pub fn current_step(steps: &[DowntimeStep], elapsed: u64) -> Option<DowntimeStep> {
    steps
        .iter()
        .filter(|step| elapsed > step.threshold_secs)
        .last()
        .copied()
}

/// Move to the downtime for the current step, applying it through
/// `control` when it differs from `old_downtime`.
pub fn advance<C: DowntimeControl + ?Sized>(
    old_downtime: Option<u64>,
    steps: &[DowntimeStep],
    elapsed: u64,
    control: &C,
) -> DowntimeUpdate {
    let Some(step) = current_step(steps, elapsed) else {
        return DowntimeUpdate {
            downtime: old_downtime,
            event: DowntimeEvent::NoCurrentStep,
        };
    };

    if old_downtime == Some(step.downtime_ms) {
        return DowntimeUpdate {
            downtime: old_downtime,
            event: DowntimeEvent::Unchanged,
        };
    }

    let event = match control.configure_max_downtime(step.downtime_ms) {
        Ok(()) => DowntimeEvent::Increased {
            downtime_ms: step.downtime_ms,
            threshold_secs: step.threshold_secs,
        },
        Err(error) => DowntimeEvent::ApplyFailed {
            downtime_ms: step.downtime_ms,
            threshold_secs: step.threshold_secs,
            error,
        },
    };

    DowntimeUpdate {
        downtime: Some(step.downtime_ms),
        event,
    }
}

/// Build the step table for a guest carrying `data_gb` GiB of RAM and disk.
///
/// Downtime grows geometrically from `downtime / (steps + 1)` to `downtime`
/// over `steps + 1` entries spaced `downtime_delay * data_gb` seconds apart.
pub fn downtime_steps(settings: &LiveMigrationSettings, data_gb: f64) -> Vec<DowntimeStep> {
    let downtime = settings.downtime as f64;
    let steps = settings.downtime_steps;
    let delay = (settings.downtime_delay as f64 * data_gb) as u64;

    let offset = downtime / (steps as f64 + 1.0);
    let base = (downtime - offset).powf(1.0 / steps as f64);

    (0..=steps)
        .map(|i| DowntimeStep {
            threshold_secs: delay * i as u64,
            downtime_ms: (offset + base.powf(i as f64)) as u64,
        })
        .collect()
}

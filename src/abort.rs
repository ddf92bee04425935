//! Decides when an in-flight migration has to be given up.
//!
//! Two independent limits apply, each disabled by a zero timeout: a stall
//! limit on time since the last forward progress, and an overall limit on
//! total elapsed time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// No data was transferred for `stalled_secs`.
    Stalled { stalled_secs: i64 },
    CompletionTimeout { timeout_secs: u64 },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Stalled { stalled_secs } => {
                write!(f, "Live migration stuck for {} sec", stalled_secs)
            }
            AbortReason::CompletionTimeout { timeout_secs } => {
                write!(f, "Live migration not completed after {} sec", timeout_secs)
            }
        }
    }
}

/// All times are whole seconds; `now` and `progress_time` are epoch based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortCheck {
    pub now: i64,
    pub progress_time: i64,
    pub progress_timeout: u64,
    pub elapsed: u64,
    pub completion_timeout: u64,
}

impl AbortCheck {
    pub fn reason(&self) -> Option<AbortReason> {
        let stalled_secs = self.now - self.progress_time;
        let progress_timeout = i64::try_from(self.progress_timeout).unwrap_or(i64::MAX);
        if self.progress_timeout != 0 && stalled_secs > progress_timeout {
            return Some(AbortReason::Stalled { stalled_secs });
        }

        if self.completion_timeout != 0 && self.elapsed > self.completion_timeout {
            return Some(AbortReason::CompletionTimeout {
                timeout_secs: self.completion_timeout,
            });
        }

        None
    }
}

pub fn should_abort(
    now: i64,
    progress_time: i64,
    progress_timeout: u64,
    elapsed: u64,
    completion_timeout: u64,
) -> bool {
    AbortCheck {
        now,
        progress_time,
        progress_timeout,
        elapsed,
        completion_timeout,
    }
    .reason()
    .is_some()
}

use crate::error::HypervisorError;
use serde::{Deserialize, Serialize};

/// Asks the source host whether the guest is still running there.
pub trait GuestQuery {
    fn is_active(&self) -> Result<bool, HypervisorError>;
}

impl<F> GuestQuery for F
where
    F: Fn() -> Result<bool, HypervisorError>,
{
    fn is_active(&self) -> Result<bool, HypervisorError> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionReason {
    /// Guest still runs on the source, so execution was never handed off.
    GuestStillActive,
    GuestShutOff,
    /// Guest already cleaned up locally after a successful handoff.
    GuestMissing,
    QueryFailed(HypervisorError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: MigrationOutcome,
    pub reason: ResolutionReason,
}

impl Resolution {
    fn new(outcome: MigrationOutcome, reason: ResolutionReason) -> Self {
        Self { outcome, reason }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == MigrationOutcome::Completed
    }
}

/// Decide how a migration ended once the hypervisor reports no job at all.
pub fn resolve<Q: GuestQuery + ?Sized>(query: &Q) -> Resolution {
    match query.is_active() {
        Ok(true) => Resolution::new(MigrationOutcome::Failed, ResolutionReason::GuestStillActive),
        Ok(false) => Resolution::new(MigrationOutcome::Completed, ResolutionReason::GuestShutOff),
        Err(err) if err.is_not_found() => {
            Resolution::new(MigrationOutcome::Completed, ResolutionReason::GuestMissing)
        }
        Err(err) => Resolution::new(MigrationOutcome::Failed, ResolutionReason::QueryFailed(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeGuest(Result<bool, HypervisorError>);

    impl GuestQuery for FakeGuest {
        fn is_active(&self) -> Result<bool, HypervisorError> {
            self.0.clone()
        }
    }

    #[test]
    fn active_guest_means_failure() {
        let resolution = resolve(&FakeGuest(Ok(true)));
        assert_eq!(resolution.outcome, MigrationOutcome::Failed);
        assert_eq!(resolution.reason, ResolutionReason::GuestStillActive);
    }

    #[test]
    fn inactive_guest_means_completion() {
        assert!(resolve(&FakeGuest(Ok(false))).is_completed());
    }

    #[test]
    fn missing_domain_means_completion() {
        let resolution = resolve(&FakeGuest(Err(HypervisorError::NotFound("instance-0001".into()))));
        assert_eq!(resolution.outcome, MigrationOutcome::Completed);
        assert_eq!(resolution.reason, ResolutionReason::GuestMissing);
    }

    #[test]
    fn other_errors_mean_failure_with_detail() {
        let resolution = resolve(&FakeGuest(Err(HypervisorError::Other("connection reset".into()))));
        assert_eq!(resolution.outcome, MigrationOutcome::Failed);
        assert_eq!(
            resolution.reason,
            ResolutionReason::QueryFailed(HypervisorError::Other("connection reset".into()))
        );
    }
}

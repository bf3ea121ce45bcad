//! Fault injection for driver-failure testing.

use sai_common::error::{SaiError, SaiResult, Status};

/// Controls when the virtual switch fails a driver call.
///
/// Two knobs:
/// - [`fail_after`](FaultInjector::fail_after): the next `n` driver calls
///   succeed, the call after that fails once with the configured status.
/// - [`batch_limit`](FaultInjector::batch_limit): batch child operations
///   apply at most `k` children, then report a partial failure with the
///   applied count. Stays armed until cleared.
///
/// Every driver call ticks the total call counter, which tests use to
/// assert that an operation produced no hardware traffic.
#[derive(Debug, Default)]
pub struct FaultInjector {
    remaining: Option<u32>,
    batch_limit: Option<usize>,
    fail_status: Option<Status>,
    calls: u64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot failure after `n` successful calls.
    pub fn fail_after(&mut self, n: u32, status: Status) {
        self.remaining = Some(n);
        self.fail_status = Some(status);
    }

    /// Caps batch child operations to `k` applied children.
    pub fn batch_limit(&mut self, k: usize, status: Status) {
        self.batch_limit = Some(k);
        self.fail_status = Some(status);
    }

    /// Clears all armed faults.
    pub fn clear(&mut self) {
        self.remaining = None;
        self.batch_limit = None;
        self.fail_status = None;
    }

    /// Total driver calls observed.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Accounts one driver call; fails it if the one-shot trigger is due.
    pub fn tick(&mut self) -> SaiResult<()> {
        self.calls += 1;
        match self.remaining {
            Some(0) => {
                self.remaining = None;
                let status = self.fail_status.take().unwrap_or(Status::Failure);
                Err(SaiError::Status { status })
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Returns the armed batch cap, if any, with its failure status.
    pub fn batch_cap(&self) -> Option<(usize, Status)> {
        self.batch_limit
            .map(|k| (k, self.fail_status.unwrap_or(Status::Failure)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_never_fails() {
        let mut faults = FaultInjector::new();
        for _ in 0..100 {
            assert!(faults.tick().is_ok());
        }
        assert_eq!(faults.calls(), 100);
    }

    #[test]
    fn test_fail_after_is_one_shot() {
        let mut faults = FaultInjector::new();
        faults.fail_after(2, Status::NoMemory);
        assert!(faults.tick().is_ok());
        assert!(faults.tick().is_ok());
        let err = faults.tick().unwrap_err();
        assert!(matches!(
            err,
            SaiError::Status {
                status: Status::NoMemory
            }
        ));
        assert!(faults.tick().is_ok());
    }

    #[test]
    fn test_batch_cap_persists() {
        let mut faults = FaultInjector::new();
        faults.batch_limit(3, Status::TableFull);
        assert_eq!(faults.batch_cap(), Some((3, Status::TableFull)));
        assert_eq!(faults.batch_cap(), Some((3, Status::TableFull)));
        faults.clear();
        assert_eq!(faults.batch_cap(), None);
    }
}

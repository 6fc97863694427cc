//! Bounded retry counter for release attempts
//!
//! Counts consecutive failed attempts for one candidate tag. A new candidate
//! or a committed release resets the count. The counter trips once failures
//! exceed the bound, so with a bound of 3 the fourth failure is fatal.

use tracing::debug;

/// Failed attempts tolerated per candidate before the job aborts
pub const MAX_APPLY_RETRIES: u32 = 3;

/// Result of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Try again next cycle
    Retry { attempts: u32 },
    /// Bound exceeded
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    candidate: Option<String>,
    failures: u32,
    bound: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(MAX_APPLY_RETRIES)
    }
}

impl RetryState {
    pub fn new(bound: u32) -> Self {
        Self {
            candidate: None,
            failures: 0,
            bound,
        }
    }

    /// Note this cycle's candidate; returns true when the count was reset
    pub fn observe(&mut self, candidate: &str) -> bool {
        if self.candidate.as_deref() == Some(candidate) {
            return false;
        }
        let had_failures = self.failures > 0;
        if had_failures {
            debug!(
                "Candidate changed to {}, dropping {} failed attempts",
                candidate, self.failures
            );
        }
        self.candidate = Some(candidate.to_string());
        self.failures = 0;
        had_failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) -> RetryVerdict {
        self.failures += 1;
        if self.failures > self.bound {
            RetryVerdict::Exhausted {
                attempts: self.failures,
            }
        } else {
            RetryVerdict::Retry {
                attempts: self.failures,
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourth_failure_exhausts() {
        let mut retry = RetryState::default();
        retry.observe("v1.1.0");

        assert_eq!(retry.record_failure(), RetryVerdict::Retry { attempts: 1 });
        assert_eq!(retry.record_failure(), RetryVerdict::Retry { attempts: 2 });
        assert_eq!(retry.record_failure(), RetryVerdict::Retry { attempts: 3 });
        assert_eq!(retry.record_failure(), RetryVerdict::Exhausted { attempts: 4 });
    }

    #[test]
    fn test_new_candidate_resets() {
        let mut retry = RetryState::default();
        retry.observe("v1.1.0");
        retry.record_failure();
        retry.record_failure();

        assert!(!retry.observe("v1.1.0"));
        assert_eq!(retry.failures(), 2);

        assert!(retry.observe("v1.2.0"));
        assert_eq!(retry.failures(), 0);
    }

    #[test]
    fn test_success_resets() {
        let mut retry = RetryState::new(1);
        retry.observe("v1.1.0");
        retry.record_failure();
        retry.record_success();
        assert_eq!(retry.record_failure(), RetryVerdict::Retry { attempts: 1 });
        assert_eq!(retry.record_failure(), RetryVerdict::Exhausted { attempts: 2 });
    }
}

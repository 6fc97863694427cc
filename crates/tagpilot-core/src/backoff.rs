//! Readiness back-off schedule
//!
//! After a manifest is applied the deployment is checked a fixed number of
//! times. The waits before those checks use at most three quarters of the
//! job's check interval; the remaining quarter is left for the rest of the
//! reconciliation cycle.

use std::time::Duration;

/// Smallest check interval accepted outside development mode
pub const MIN_CHECK_INTERVAL_SECS: u64 = 120;

/// Smallest check interval in development mode
pub const MIN_DEV_CHECK_INTERVAL_SECS: u64 = 1;

/// Number of readiness checks after an apply
pub const READINESS_CHECKS: usize = 5;

/// Largest equal slot before the schedule switches to a front-loaded progression
pub const FIRST_SLOT_SECS: u64 = 120;

/// Clamp a configured interval to the production minimum unless short
/// intervals are explicitly allowed
pub fn effective_interval_secs(configured: u64, allow_short: bool) -> u64 {
    if allow_short {
        configured.max(MIN_DEV_CHECK_INTERVAL_SECS)
    } else {
        configured.max(MIN_CHECK_INTERVAL_SECS)
    }
}

/// Wait durations preceding each readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSchedule {
    slots: [Duration; READINESS_CHECKS],
}

impl ReadinessSchedule {
    /// Build the schedule for a check interval given in seconds.
    ///
    /// The budget is `3 * interval / 4`. An equal split is used while each
    /// share stays at or below [`FIRST_SLOT_SECS`]. Beyond that the first
    /// slot is fixed at [`FIRST_SLOT_SECS`], each following slot takes the
    /// smaller of double its predecessor and an equal share of what is left,
    /// and the last slot absorbs the remainder exactly.
    pub fn for_interval(interval_secs: u64, allow_short: bool) -> Self {
        let interval = effective_interval_secs(interval_secs, allow_short);
        // floor(3 * interval / 4) without overflowing
        let budget = interval / 4 * 3 + interval % 4 * 3 / 4;
        let share = budget / READINESS_CHECKS as u64;

        let mut secs = [share; READINESS_CHECKS];
        if share > FIRST_SLOT_SECS {
            secs[0] = FIRST_SLOT_SECS;
            let mut spent = secs[0];
            for i in 1..READINESS_CHECKS - 1 {
                let remaining_slots = (READINESS_CHECKS - i) as u64;
                let equal_share = (budget - spent) / remaining_slots;
                secs[i] = equal_share.min(secs[i - 1] * 2);
                spent += secs[i];
            }
            secs[READINESS_CHECKS - 1] = budget - spent;
        }

        Self {
            slots: secs.map(Duration::from_secs),
        }
    }

    /// The individual waits, in order
    pub fn slots(&self) -> &[Duration] {
        &self.slots
    }

    /// Sum of all waits
    pub fn total(&self) -> Duration {
        self.slots.iter().sum()
    }
}

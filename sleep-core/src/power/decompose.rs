//! Splits an arbitrary sleep budget into watchdog ladder intervals.
//!
//! The ladder rungs are powers of two, so taking the largest rung that fits
//! at every step reads the binary digits of the rounded budget and uses the
//! fewest possible watchdog reconfigurations.

use super::{MIN_WATCHDOG_MS, PowerController, PowerDownDriver, WakeReason, WatchdogPeriod};
use crate::policy::SleepOutcome;

/// Greedy largest-first interval sequence for a millisecond budget.
///
/// The budget is rounded up to the next 16 ms boundary, so the intervals sum
/// to a value in `[ms, ms + 16)`. A zero budget yields no intervals; callers
/// treat it as an indefinite sleep instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepPlan {
    residual: u32,
}

impl SleepPlan {
    pub const fn new(ms: u32) -> Self {
        let residual = if ms == 0 {
            0
        } else {
            ms.saturating_add(MIN_WATCHDOG_MS - 1)
        };
        Self { residual }
    }

    /// Total milliseconds the remaining intervals will sleep.
    pub const fn planned_millis(&self) -> u32 {
        self.residual - self.residual % MIN_WATCHDOG_MS
    }
}

impl Iterator for SleepPlan {
    type Item = WatchdogPeriod;

    fn next(&mut self) -> Option<WatchdogPeriod> {
        let period = WatchdogPeriod::largest_fitting(self.residual)?;
        self.residual -= period.as_millis()?;
        Some(period)
    }
}

/// Result of a decomposed sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepReport {
    pub outcome: SleepOutcome,
    /// Power-down cycles executed.
    pub intervals: u16,
    /// Sum of the intervals slept; zero for an indefinite sleep.
    pub slept_ms: u32,
    pub indefinite: bool,
}

/// Sleeps for `ms` (rounded up to 16 ms), or until woken when `ms == 0`.
pub fn decompose<P: PowerController>(driver: &mut PowerDownDriver<'_, P>, ms: u32) -> SleepReport {
    if ms == 0 {
        let reason = driver.power_down(WatchdogPeriod::Forever);
        return SleepReport {
            outcome: SleepOutcome::from(reason),
            intervals: 1,
            slept_ms: 0,
            indefinite: true,
        };
    }

    let mut report = SleepReport {
        outcome: SleepOutcome::TimerWake,
        intervals: 0,
        slept_ms: 0,
        indefinite: false,
    };
    for period in SleepPlan::new(ms) {
        let reason = driver.power_down(period);
        report.intervals = report.intervals.saturating_add(1);
        report.slept_ms = report
            .slept_ms
            .saturating_add(period.as_millis().unwrap_or(0));
        if reason == WakeReason::Interrupt {
            report.outcome = SleepOutcome::InterruptWake;
            break;
        }
    }
    report
}

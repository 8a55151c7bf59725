//! In-memory sleep telemetry: a bounded event history plus running totals.
//!
//! Nothing here survives a power cycle. Firmware drains the history after
//! each wake and mirrors it to its log sink; the emulator prints it.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::policy::SleepOutcome;
use crate::power::SleepReport;

/// Number of sleep records retained in memory.
pub const SLEEP_HISTORY_CAPACITY: usize = 32;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Why a sleep request ended in [`SleepOutcome::NotPossible`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RefusalReason {
    /// Repeaters must keep listening and never power down.
    Repeater,
    TransportNotReady,
    FirmwareUpdate,
    /// Budget shorter than the smart-sleep listen window.
    SmartSleepWindow,
}

impl RefusalReason {
    pub const fn label(self) -> &'static str {
        match self {
            RefusalReason::Repeater => "repeater",
            RefusalReason::TransportNotReady => "transport-not-ready",
            RefusalReason::FirmwareUpdate => "firmware-update",
            RefusalReason::SmartSleepWindow => "no-time-left",
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Milestones of a single sleep request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepEvent {
    Requested { duration_ms: u32, smart: bool },
    Refused(RefusalReason),
    TransportWait { elapsed_ms: u32, ready: bool },
    FirmwareUpdateWait { waited_ms: u32 },
    PreSleepSent { window_ms: u32, delivered: bool },
    PowerDown { budget_ms: u32 },
    Woke {
        outcome: SleepOutcome,
        intervals: u16,
        slept_ms: u32,
        stray_wakes: u32,
    },
    PostSleepSent { slept_ms: u32, delivered: bool },
}

impl fmt::Display for SleepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepEvent::Requested { duration_ms, smart } => {
                write!(f, "requested ms={duration_ms} smart={smart}")
            }
            SleepEvent::Refused(reason) => write!(f, "refused {reason}"),
            SleepEvent::TransportWait { elapsed_ms, ready } => {
                write!(f, "transport-wait elapsed={elapsed_ms}ms ready={ready}")
            }
            SleepEvent::FirmwareUpdateWait { waited_ms } => {
                write!(f, "firmware-update-wait waited={waited_ms}ms")
            }
            SleepEvent::PreSleepSent {
                window_ms,
                delivered,
            } => write!(f, "pre-sleep window={window_ms}ms delivered={delivered}"),
            SleepEvent::PowerDown { budget_ms } => write!(f, "power-down budget={budget_ms}ms"),
            SleepEvent::Woke {
                outcome,
                intervals,
                slept_ms,
                stray_wakes,
            } => write!(
                f,
                "woke {outcome} intervals={intervals} slept={slept_ms}ms stray={stray_wakes}"
            ),
            SleepEvent::PostSleepSent {
                slept_ms,
                delivered,
            } => write!(f, "post-sleep slept={slept_ms}ms delivered={delivered}"),
        }
    }
}

/// Event stored in the history ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepRecord {
    pub id: EventId,
    pub timestamp_ms: u32,
    pub event: SleepEvent,
}

/// Running totals since boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SleepStats {
    pub requests: u32,
    pub timer_wakes: u32,
    pub refusals: u32,
    pub power_down_cycles: u32,
    pub stray_wakes: u32,
    pub slept_ms: u64,
}

/// Records sleep events into a fixed-size ring and keeps [`SleepStats`].
pub struct SleepTelemetry<const CAPACITY: usize = SLEEP_HISTORY_CAPACITY> {
    ring: HistoryBuf<SleepRecord, CAPACITY>,
    stats: SleepStats,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> SleepTelemetry<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            stats: SleepStats {
                requests: 0,
                timer_wakes: 0,
                refusals: 0,
                power_down_cycles: 0,
                stray_wakes: 0,
                slept_ms: 0,
            },
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, SleepRecord> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&SleepRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn stats(&self) -> SleepStats {
        self.stats
    }

    /// Id the next recorded event will receive; lets callers pick up only
    /// what was added since a previous look.
    pub fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Events with an id at or after `since`, oldest first.
    pub fn since(&self, since: EventId) -> impl Iterator<Item = &SleepRecord> + '_ {
        self.oldest_first().filter(move |record| record.id >= since)
    }

    pub fn record(&mut self, event: SleepEvent, timestamp_ms: u32) -> EventId {
        match event {
            SleepEvent::Requested { .. } => {
                self.stats.requests = self.stats.requests.saturating_add(1);
            }
            SleepEvent::Refused(_) => {
                self.stats.refusals = self.stats.refusals.saturating_add(1);
            }
            _ => {}
        }

        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(SleepRecord {
            id,
            timestamp_ms,
            event,
        });
        id
    }

    /// Records the wake-up that closes a decomposed sleep.
    pub fn record_wake(&mut self, report: SleepReport, stray_wakes: u32, timestamp_ms: u32) -> EventId {
        if report.outcome == SleepOutcome::TimerWake {
            self.stats.timer_wakes = self.stats.timer_wakes.saturating_add(1);
        }
        self.stats.power_down_cycles = self
            .stats
            .power_down_cycles
            .saturating_add(u32::from(report.intervals));
        self.stats.stray_wakes = self.stats.stray_wakes.saturating_add(stray_wakes);
        self.stats.slept_ms = self.stats.slept_ms.saturating_add(u64::from(report.slept_ms));

        self.record(
            SleepEvent::Woke {
                outcome: report.outcome,
                intervals: report.intervals,
                slept_ms: report.slept_ms,
                stray_wakes,
            },
            timestamp_ms,
        )
    }
}

impl<const CAPACITY: usize> Default for SleepTelemetry<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

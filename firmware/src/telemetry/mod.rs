//! Mirrors the sleep history to the log sink after every request.
//!
//! The shared core keeps the bounded event ring; the firmware only remembers
//! how far it has already printed. Records go to defmt on the target and to
//! stdout on the host so the drain logic stays testable.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use sleep_core::telemetry::{EventId, SleepRecord, SleepTelemetry};

/// Position in the telemetry stream up to which records were emitted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TelemetryCursor {
    next: EventId,
}

impl TelemetryCursor {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Emits every record added since the previous drain and returns how many
    /// were printed. Records that were overwritten in the ring before this
    /// call are skipped.
    pub fn drain<const CAPACITY: usize>(&mut self, telemetry: &SleepTelemetry<CAPACITY>) -> usize {
        let mut emitted = 0;
        for record in telemetry.since(self.next) {
            emit_record(record);
            emitted += 1;
        }
        self.next = telemetry.next_id();
        emitted
    }
}

/// Logs the running totals once per drain.
pub fn log_stats<const CAPACITY: usize>(telemetry: &SleepTelemetry<CAPACITY>) {
    let stats = telemetry.stats();
    emit_stats(
        stats.requests,
        stats.timer_wakes,
        stats.refusals,
        stats.stray_wakes,
    );
}

#[cfg(target_os = "none")]
fn emit_record(record: &SleepRecord) {
    defmt::info!(
        "telemetry:sleep #{} t={}ms {}",
        record.id,
        record.timestamp_ms,
        record.event
    );
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &SleepRecord) {
    println!(
        "telemetry:sleep #{} t={}ms {}",
        record.id, record.timestamp_ms, record.event
    );
}

#[cfg(target_os = "none")]
fn emit_stats(requests: u32, timer_wakes: u32, refusals: u32, stray_wakes: u32) {
    defmt::info!(
        "telemetry:stats requests={} timer={} refused={} stray={}",
        requests,
        timer_wakes,
        refusals,
        stray_wakes
    );
}

#[cfg(not(target_os = "none"))]
fn emit_stats(requests: u32, timer_wakes: u32, refusals: u32, stray_wakes: u32) {
    println!(
        "telemetry:stats requests={requests} timer={timer_wakes} refused={refusals} stray={stray_wakes}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleep_core::telemetry::{RefusalReason, SleepEvent};

    #[test]
    fn drains_only_new_records() {
        let mut telemetry: SleepTelemetry<8> = SleepTelemetry::new();
        let mut cursor = TelemetryCursor::new();

        telemetry.record(
            SleepEvent::Requested {
                duration_ms: 100,
                smart: false,
            },
            0,
        );
        telemetry.record(SleepEvent::PowerDown { budget_ms: 100 }, 1);
        assert_eq!(cursor.drain(&telemetry), 2);
        assert_eq!(cursor.drain(&telemetry), 0);

        telemetry.record(SleepEvent::Refused(RefusalReason::Repeater), 2);
        assert_eq!(cursor.drain(&telemetry), 1);
        log_stats(&telemetry);
    }

    #[test]
    fn skips_records_lost_to_wraparound() {
        let mut telemetry: SleepTelemetry<2> = SleepTelemetry::new();
        let mut cursor = TelemetryCursor::new();

        for timestamp in 0..5 {
            telemetry.record(SleepEvent::PowerDown { budget_ms: 16 }, timestamp);
        }

        assert_eq!(cursor.drain(&telemetry), 2);
        assert_eq!(cursor, TelemetryCursor { next: 5 });
    }
}

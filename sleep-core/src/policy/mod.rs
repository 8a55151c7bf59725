//! Top-level sleep entry point.
//!
//! [`SleepPolicyController::request_sleep`] decides whether the node may
//! power down right now, negotiates with the transport, the firmware-update
//! manager and the indication LEDs, and hands whatever budget is left to the
//! duration decomposer. Every refusal is reported as
//! [`SleepOutcome::NotPossible`] only after the requested wall-clock time has
//! been spent waiting, so periodic callers never drift.

use core::fmt;

use crate::power::{PowerController, PowerDownDriver, WakeReason, decompose};
use crate::telemetry::{RefusalReason, SleepEvent, SleepTelemetry};

pub mod config;
pub mod node;

pub use config::{Capabilities, SleepConfig};
pub use node::{
    Clock, FirmwareUpdate, Indication, Indicator, NoopFirmwareUpdate, NoopIndicator,
    NoopTransport, SleepNotification, Transport,
};

/// Legacy status code for a timer wake.
pub const WAKE_UP_BY_TIMER: i8 = -1;
/// Legacy status code for a refused sleep.
pub const SLEEP_NOT_POSSIBLE: i8 = -2;

/// Parameters of a single sleep request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepRequest {
    /// Sleep budget; zero sleeps until an external wake.
    pub duration_ms: u32,
    /// Run the pre/post-sleep notification handshake.
    pub smart_sleep: bool,
}

impl SleepRequest {
    pub const fn new(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            smart_sleep: false,
        }
    }

    pub const fn smart(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            smart_sleep: true,
        }
    }
}

/// How a sleep request ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepOutcome {
    TimerWake,
    /// Reserved for external-interrupt wake; not produced yet.
    InterruptWake,
    NotPossible,
}

impl SleepOutcome {
    /// Encodes the outcome as the legacy signed status code.
    #[must_use]
    pub const fn to_raw(self) -> i8 {
        match self {
            SleepOutcome::TimerWake => WAKE_UP_BY_TIMER,
            SleepOutcome::InterruptWake => 0,
            SleepOutcome::NotPossible => SLEEP_NOT_POSSIBLE,
        }
    }

    /// Decodes a legacy status code; non-negative codes name an interrupt.
    #[must_use]
    pub const fn from_raw(code: i8) -> Option<Self> {
        match code {
            WAKE_UP_BY_TIMER => Some(SleepOutcome::TimerWake),
            SLEEP_NOT_POSSIBLE => Some(SleepOutcome::NotPossible),
            code if code >= 0 => Some(SleepOutcome::InterruptWake),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            SleepOutcome::TimerWake => "timer-wake",
            SleepOutcome::InterruptWake => "interrupt-wake",
            SleepOutcome::NotPossible => "not-possible",
        }
    }
}

impl From<WakeReason> for SleepOutcome {
    fn from(reason: WakeReason) -> Self {
        match reason {
            WakeReason::Timer => SleepOutcome::TimerWake,
            WakeReason::Interrupt => SleepOutcome::InterruptWake,
        }
    }
}

impl fmt::Display for SleepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sleep policy bound to one node's hardware and collaborators.
pub struct SleepPolicyController<
    H,
    C,
    T = NoopTransport,
    F = NoopFirmwareUpdate,
    I = NoopIndicator,
> {
    hw: H,
    clock: C,
    transport: T,
    firmware: F,
    indicator: I,
    capabilities: Capabilities,
    config: SleepConfig,
    telemetry: SleepTelemetry,
}

impl<H, C> SleepPolicyController<H, C>
where
    H: PowerController,
    C: Clock,
{
    /// Creates a controller with no-op transport, firmware-update and
    /// indication collaborators; swap them in with the `with_*` builders.
    pub fn new(hw: H, clock: C, capabilities: Capabilities) -> Self {
        Self {
            hw,
            clock,
            transport: NoopTransport,
            firmware: NoopFirmwareUpdate,
            indicator: NoopIndicator,
            capabilities,
            config: SleepConfig::new(),
            telemetry: SleepTelemetry::new(),
        }
    }
}

impl<H, C, T, F, I> SleepPolicyController<H, C, T, F, I>
where
    H: PowerController,
    C: Clock,
    T: Transport,
    F: FirmwareUpdate,
    I: Indicator,
{
    #[must_use]
    pub fn with_config(mut self, config: SleepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport<T2: Transport>(self, transport: T2) -> SleepPolicyController<H, C, T2, F, I> {
        SleepPolicyController {
            hw: self.hw,
            clock: self.clock,
            transport,
            firmware: self.firmware,
            indicator: self.indicator,
            capabilities: self.capabilities,
            config: self.config,
            telemetry: self.telemetry,
        }
    }

    pub fn with_firmware_update<F2: FirmwareUpdate>(
        self,
        firmware: F2,
    ) -> SleepPolicyController<H, C, T, F2, I> {
        SleepPolicyController {
            hw: self.hw,
            clock: self.clock,
            transport: self.transport,
            firmware,
            indicator: self.indicator,
            capabilities: self.capabilities,
            config: self.config,
            telemetry: self.telemetry,
        }
    }

    pub fn with_indicator<I2: Indicator>(self, indicator: I2) -> SleepPolicyController<H, C, T, F, I2> {
        SleepPolicyController {
            hw: self.hw,
            clock: self.clock,
            transport: self.transport,
            firmware: self.firmware,
            indicator,
            capabilities: self.capabilities,
            config: self.config,
            telemetry: self.telemetry,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    pub fn config(&self) -> SleepConfig {
        self.config
    }

    pub fn telemetry(&self) -> &SleepTelemetry {
        &self.telemetry
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn firmware_update_mut(&mut self) -> &mut F {
        &mut self.firmware
    }

    pub fn indicator_mut(&mut self) -> &mut I {
        &mut self.indicator
    }

    /// Sleeps for up to `request.duration_ms`, or reports why it could not.
    ///
    /// Blocks the caller for the whole request; there is no way to cancel a
    /// power-down once it has started.
    pub fn request_sleep(&mut self, request: SleepRequest) -> SleepOutcome {
        let SleepRequest {
            duration_ms,
            smart_sleep,
        } = request;
        debug!("sleep: request ms={} smart={}", duration_ms, smart_sleep);
        self.record(SleepEvent::Requested {
            duration_ms,
            smart: smart_sleep,
        });

        if self.capabilities.repeater {
            self.clock.wait_ms(duration_ms);
            return self.refuse(RefusalReason::Repeater);
        }

        let network = self.capabilities.network;
        let smart_sleep = smart_sleep && network;
        let mut remaining = duration_ms;

        if network && !self.transport.is_ready() {
            match self.await_transport(remaining) {
                Some(left) => remaining = left,
                None => return self.refuse(RefusalReason::TransportNotReady),
            }
        }

        if self.capabilities.tracks_firmware_updates() && !self.await_firmware_update(&mut remaining) {
            return self.refuse(RefusalReason::FirmwareUpdate);
        }

        if smart_sleep {
            let window_ms = self.config.smart_sleep_window_ms;
            if remaining > 0 && remaining < window_ms {
                self.clock.wait_ms(remaining);
                return self.refuse(RefusalReason::SmartSleepWindow);
            }

            let delivered = self
                .transport
                .send_route(SleepNotification::PreSleep { window_ms });
            self.record(SleepEvent::PreSleepSent {
                window_ms,
                delivered,
            });
            self.clock.wait_ms(window_ms);

            if self.capabilities.tracks_firmware_updates() && self.firmware.is_update_ongoing() {
                return self.refuse(RefusalReason::FirmwareUpdate);
            }
        }

        if network {
            self.transport.disable();
        }
        self.indicator.set_indication(Indication::Sleep);
        while self.indicator.is_blinking() {
            self.indicator.step();
        }

        self.record(SleepEvent::PowerDown {
            budget_ms: remaining,
        });
        let mut driver = PowerDownDriver::new(&mut self.hw);
        let report = decompose(&mut driver, remaining);
        let stray_wakes = driver.stray_wakes();
        let now = self.clock.now_ms();
        self.telemetry.record_wake(report, stray_wakes, now);
        debug!(
            "sleep: woke outcome={} slept={}ms intervals={}",
            report.outcome.to_raw(),
            report.slept_ms,
            report.intervals
        );

        self.indicator.set_indication(Indication::Wakeup);
        if network {
            self.transport.reinitialise();
        }

        if smart_sleep {
            let slept_ms = report.slept_ms;
            let delivered = self
                .transport
                .send_route(SleepNotification::PostSleep { slept_ms });
            self.record(SleepEvent::PostSleepSent {
                slept_ms,
                delivered,
            });
        }

        report.outcome
    }

    /// Services the transport until it is ready, the reconnect timeout passes
    /// or the budget runs out. Returns the budget left, or `None` when the
    /// request has to be refused (after the whole budget has been waited out).
    fn await_transport(&mut self, budget_ms: u32) -> Option<u32> {
        warn!("sleep: transport not ready");
        let timeout_ms = self.config.transport_reconnect_timeout_ms;
        let entered = self.clock.now_ms();
        let mut elapsed = 0u32;
        let mut ready = self.transport.is_ready();
        while !ready && elapsed < budget_ms && elapsed < timeout_ms {
            self.transport.process();
            elapsed = self.clock.now_ms().wrapping_sub(entered);
            ready = self.transport.is_ready();
        }
        self.record(SleepEvent::TransportWait {
            elapsed_ms: elapsed,
            ready,
        });

        if elapsed >= budget_ms {
            return None;
        }
        let left = budget_ms - elapsed;
        if !ready {
            self.clock.wait_ms(left);
            return None;
        }
        debug!("sleep: transport ready, remaining={}ms", left);
        Some(left)
    }

    /// Waits in poll steps while a firmware update runs, shrinking the budget
    /// towards zero. Returns `false` if the update is still running, or if the
    /// wait used up a timed budget; a zero budget left after waiting must not
    /// turn into an indefinite sleep.
    fn await_firmware_update(&mut self, remaining: &mut u32) -> bool {
        let poll_ms = self.config.firmware_update_poll_ms;
        let mut waited = 0u32;
        while *remaining > 0 && self.firmware.is_update_ongoing() {
            warn!("sleep: firmware update ongoing");
            self.clock.wait_ms(poll_ms);
            waited = waited.saturating_add(poll_ms);
            *remaining = remaining.saturating_sub(poll_ms);
        }
        if waited > 0 {
            self.record(SleepEvent::FirmwareUpdateWait { waited_ms: waited });
            if *remaining == 0 {
                return false;
            }
        }
        !self.firmware.is_update_ongoing()
    }

    fn refuse(&mut self, reason: RefusalReason) -> SleepOutcome {
        warn!("sleep: not possible ({})", reason.label());
        self.record(SleepEvent::Refused(reason));
        SleepOutcome::NotPossible
    }

    fn record(&mut self, event: SleepEvent) {
        let now = self.clock.now_ms();
        self.telemetry.record(event, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_round_trip_legacy_values() {
        assert_eq!(SleepOutcome::TimerWake.to_raw(), -1);
        assert_eq!(SleepOutcome::NotPossible.to_raw(), -2);
        assert_eq!(SleepOutcome::from_raw(-1), Some(SleepOutcome::TimerWake));
        assert_eq!(SleepOutcome::from_raw(-2), Some(SleepOutcome::NotPossible));
        assert_eq!(SleepOutcome::from_raw(1), Some(SleepOutcome::InterruptWake));
        assert_eq!(SleepOutcome::from_raw(-7), None);
    }

    #[test]
    fn wake_reasons_map_to_outcomes() {
        assert_eq!(SleepOutcome::from(WakeReason::Timer), SleepOutcome::TimerWake);
        assert_eq!(SleepOutcome::from(WakeReason::Interrupt), SleepOutcome::InterruptWake);
    }

    #[test]
    fn request_constructors_set_smart_flag() {
        assert!(!SleepRequest::new(100).smart_sleep);
        assert!(SleepRequest::smart(100).smart_sleep);
    }
}

//! Power-down driver and the hardware seam it runs against.
//!
//! A single [`PowerDownDriver::power_down`] call owns the watchdog and the
//! analog front end for its whole duration. The state it found is captured by
//! a [`HardwareGuard`] and written back when the guard drops, so no other part
//! of the node observes a net change whichever way the call exits.
//!
//! The only channel between the watchdog interrupt and the foreground loop is
//! the [`WakeFlag`]; the driver clears and reads it with interrupts masked.

use core::ops::{Deref, DerefMut};

use portable_atomic::{AtomicBool, Ordering};

pub mod decompose;

pub use decompose::{SleepPlan, SleepReport, decompose};

/// Shortest interval the watchdog ladder supports.
pub const MIN_WATCHDOG_MS: u32 = 16;
/// Longest interval the watchdog ladder supports.
pub const MAX_WATCHDOG_MS: u32 = 8_192;

/// Interval selected on the watchdog prescaler ladder.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogPeriod {
    Ms16,
    Ms32,
    Ms64,
    Ms128,
    Ms256,
    Ms512,
    Ms1024,
    Ms2048,
    Ms4096,
    Ms8192,
    /// Watchdog disabled; only an external event ends the power-down.
    Forever,
}

impl WatchdogPeriod {
    /// Every timed rung, shortest first.
    pub const LADDER: [WatchdogPeriod; 10] = [
        WatchdogPeriod::Ms16,
        WatchdogPeriod::Ms32,
        WatchdogPeriod::Ms64,
        WatchdogPeriod::Ms128,
        WatchdogPeriod::Ms256,
        WatchdogPeriod::Ms512,
        WatchdogPeriod::Ms1024,
        WatchdogPeriod::Ms2048,
        WatchdogPeriod::Ms4096,
        WatchdogPeriod::Ms8192,
    ];

    /// Prescaler index (0 == 16 ms, 9 == 8192 ms), `None` for [`Self::Forever`].
    pub const fn index(self) -> Option<u8> {
        match self {
            WatchdogPeriod::Ms16 => Some(0),
            WatchdogPeriod::Ms32 => Some(1),
            WatchdogPeriod::Ms64 => Some(2),
            WatchdogPeriod::Ms128 => Some(3),
            WatchdogPeriod::Ms256 => Some(4),
            WatchdogPeriod::Ms512 => Some(5),
            WatchdogPeriod::Ms1024 => Some(6),
            WatchdogPeriod::Ms2048 => Some(7),
            WatchdogPeriod::Ms4096 => Some(8),
            WatchdogPeriod::Ms8192 => Some(9),
            WatchdogPeriod::Forever => None,
        }
    }

    /// Attempts to construct a timed period from a prescaler index.
    pub const fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < Self::LADDER.len() {
            Some(Self::LADDER[index as usize])
        } else {
            None
        }
    }

    /// Interval length in milliseconds, `None` for [`Self::Forever`].
    pub const fn as_millis(self) -> Option<u32> {
        match self.index() {
            Some(index) => Some(1 << (index + 4)),
            None => None,
        }
    }

    /// Largest timed rung that does not exceed `ms`.
    pub fn largest_fitting(ms: u32) -> Option<Self> {
        Self::LADDER
            .iter()
            .rev()
            .copied()
            .find(|period| period.as_millis().is_some_and(|len| len <= ms))
    }

    pub const fn is_forever(self) -> bool {
        matches!(self, WatchdogPeriod::Forever)
    }
}

/// What ended a power-down cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeReason {
    Timer,
    /// Reserved for external-interrupt wake; nothing produces it yet.
    Interrupt,
}

/// Flag raised by the watchdog interrupt and consumed by the power-down loop.
///
/// Firmware keeps exactly one of these in a `static` and hands a reference to
/// its [`PowerController`]; the interrupt handler reaches it through
/// [`on_watchdog_expiry`].
#[derive(Debug)]
pub struct WakeFlag {
    woke: AtomicBool,
}

impl WakeFlag {
    pub const fn new() -> Self {
        Self {
            woke: AtomicBool::new(false),
        }
    }

    /// Interrupt side: records a watchdog expiry.
    pub fn signal(&self) {
        self.woke.store(true, Ordering::SeqCst);
    }

    /// Driver side: forgets any previous expiry before arming a new cycle.
    pub fn clear(&self) {
        self.woke.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.woke.load(Ordering::SeqCst)
    }
}

impl Default for WakeFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the watchdog interrupt handler.
///
/// Hardware-specific acknowledgement (clearing the timer's pending bit) stays
/// in the firmware ISR; the only state the core sees change is the flag.
#[inline]
pub fn on_watchdog_expiry(flag: &WakeFlag) {
    flag.signal();
}

/// Minimal register-level surface the power-down driver needs.
pub trait PowerController {
    /// Opaque snapshot of the watchdog control register.
    type WatchdogConfig: Copy;

    /// Flag written by this target's watchdog interrupt.
    fn wake_flag(&self) -> &WakeFlag;

    fn analog_enabled(&self) -> bool;

    fn disable_analog(&mut self);

    fn enable_analog(&mut self);

    fn watchdog_config(&self) -> Self::WatchdogConfig;

    fn restore_watchdog(&mut self, config: Self::WatchdogConfig);

    /// Starts the watchdog on `period` with its interrupt enabled.
    fn configure_watchdog(&mut self, period: WatchdogPeriod);

    /// Sets the watchdog interrupt-enable bit again; hardware clears it on
    /// every expiry and the reset safety net relies on it being armed.
    fn rearm_watchdog_interrupt(&mut self);

    fn disable_watchdog(&mut self);

    fn reset_watchdog(&mut self);

    /// Blocks until buffered diagnostic output has left the device.
    fn flush_diagnostics(&mut self);

    /// Selects the deepest retainable low-power mode for the next halt.
    fn arm_deepest_sleep(&mut self);

    fn disarm_sleep(&mut self);

    fn disable_interrupts(&mut self);

    fn enable_interrupts(&mut self);

    /// Re-enables interrupts and halts as one uninterruptible pairing.
    ///
    /// Implementations must rely on the core guaranteeing that an interrupt
    /// enabled immediately before the halt instruction cannot be lost; nothing
    /// may run between the two. Returns once any interrupt resumes the CPU.
    fn enter_deepest_sleep(&mut self);
}

/// Hardware state captured before a power-down cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SavedHardwareConfig<W> {
    pub watchdog: W,
    pub analog_enabled: bool,
}

/// Scoped owner of the watchdog and analog front end.
///
/// Acquiring snapshots the current configuration and powers the analog front
/// end down. Dropping resets the watchdog, restores the snapshot and
/// re-enables interrupts.
pub struct HardwareGuard<'a, P: PowerController> {
    hw: &'a mut P,
    saved: SavedHardwareConfig<P::WatchdogConfig>,
}

impl<'a, P: PowerController> HardwareGuard<'a, P> {
    pub fn acquire(hw: &'a mut P) -> Self {
        let analog_enabled = hw.analog_enabled();
        hw.disable_analog();
        let saved = SavedHardwareConfig {
            watchdog: hw.watchdog_config(),
            analog_enabled,
        };
        Self { hw, saved }
    }

    pub fn saved(&self) -> SavedHardwareConfig<P::WatchdogConfig> {
        self.saved
    }
}

impl<P: PowerController> Deref for HardwareGuard<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.hw
    }
}

impl<P: PowerController> DerefMut for HardwareGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.hw
    }
}

impl<P: PowerController> Drop for HardwareGuard<'_, P> {
    fn drop(&mut self) {
        self.hw.reset_watchdog();
        self.hw.restore_watchdog(self.saved.watchdog);
        self.hw.enable_interrupts();
        if self.saved.analog_enabled {
            self.hw.enable_analog();
        }
    }
}

/// Runs power-down cycles against a borrowed [`PowerController`].
pub struct PowerDownDriver<'a, P: PowerController> {
    hw: &'a mut P,
    cycles: u32,
    stray_wakes: u32,
}

impl<'a, P: PowerController> PowerDownDriver<'a, P> {
    pub fn new(hw: &'a mut P) -> Self {
        Self {
            hw,
            cycles: 0,
            stray_wakes: 0,
        }
    }

    /// Number of completed [`Self::power_down`] calls.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Halts that ended without a watchdog expiry and were re-entered.
    pub fn stray_wakes(&self) -> u32 {
        self.stray_wakes
    }

    /// Powers the node down for one ladder interval, or until the wake flag is
    /// raised when `period` is [`WatchdogPeriod::Forever`].
    pub fn power_down(&mut self, period: WatchdogPeriod) -> WakeReason {
        trace!("power: down period={}", period.as_millis().unwrap_or(0));

        let mut hw = HardwareGuard::acquire(&mut *self.hw);
        // Masked from here on: an expiry during the arming steps stays
        // pending and ends the halt instead of being cleared away.
        hw.disable_interrupts();
        hw.wake_flag().clear();
        if period.is_forever() {
            hw.disable_watchdog();
        } else {
            hw.configure_watchdog(period);
        }

        loop {
            if !period.is_forever() {
                hw.rearm_watchdog_interrupt();
            }
            hw.flush_diagnostics();
            hw.arm_deepest_sleep();

            hw.enter_deepest_sleep();
            hw.disable_interrupts();
            hw.disarm_sleep();

            if hw.wake_flag().is_set() {
                break;
            }
            self.stray_wakes = self.stray_wakes.saturating_add(1);
            debug!("power: stray wake, re-entering sleep");
        }

        drop(hw);
        self.cycles = self.cycles.saturating_add(1);
        WakeReason::Timer
    }
}

/// Controller for targets without a usable low-power state.
///
/// Halting returns immediately with the flag raised, as if the watchdog had
/// expired; useful for bring-up and for capability sets that never sleep.
#[derive(Debug, Default)]
pub struct NoopPowerController {
    flag: WakeFlag,
}

impl NoopPowerController {
    pub const fn new() -> Self {
        Self {
            flag: WakeFlag::new(),
        }
    }
}

impl PowerController for NoopPowerController {
    type WatchdogConfig = ();

    fn wake_flag(&self) -> &WakeFlag {
        &self.flag
    }

    fn analog_enabled(&self) -> bool {
        true
    }

    fn disable_analog(&mut self) {}

    fn enable_analog(&mut self) {}

    fn watchdog_config(&self) {}

    fn restore_watchdog(&mut self, (): ()) {}

    fn configure_watchdog(&mut self, _: WatchdogPeriod) {}

    fn rearm_watchdog_interrupt(&mut self) {}

    fn disable_watchdog(&mut self) {}

    fn reset_watchdog(&mut self) {}

    fn flush_diagnostics(&mut self) {}

    fn arm_deepest_sleep(&mut self) {}

    fn disarm_sleep(&mut self) {}

    fn disable_interrupts(&mut self) {}

    fn enable_interrupts(&mut self) {}

    fn enter_deepest_sleep(&mut self) {
        on_watchdog_expiry(&self.flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec as HeaplessVec;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Op {
        DisableAnalog,
        EnableAnalog,
        Configure(WatchdogPeriod),
        Rearm,
        DisableWatchdog,
        ResetWatchdog,
        Restore(u8),
        Flush,
        Arm,
        Disarm,
        Cli,
        Sei,
        Halt,
    }

    struct ScriptedHardware {
        flag: WakeFlag,
        wdt: u8,
        analog: bool,
        interrupts: bool,
        stray_before_expiry: u8,
        expire_during_flush: bool,
        pending_expiry: bool,
        flag_sets: u32,
        ops: HeaplessVec<Op, 64>,
    }

    impl ScriptedHardware {
        fn new(stray_before_expiry: u8) -> Self {
            Self {
                flag: WakeFlag::new(),
                wdt: 0x40,
                analog: true,
                interrupts: true,
                stray_before_expiry,
                expire_during_flush: false,
                pending_expiry: false,
                flag_sets: 0,
                ops: HeaplessVec::new(),
            }
        }

        fn log(&mut self, op: Op) {
            self.ops.push(op).expect("op log overflow");
        }

        fn expire(&mut self) {
            if self.interrupts {
                on_watchdog_expiry(&self.flag);
                self.flag_sets += 1;
            } else {
                self.pending_expiry = true;
            }
        }
    }

    impl PowerController for ScriptedHardware {
        type WatchdogConfig = u8;

        fn wake_flag(&self) -> &WakeFlag {
            &self.flag
        }

        fn analog_enabled(&self) -> bool {
            self.analog
        }

        fn disable_analog(&mut self) {
            self.analog = false;
            self.log(Op::DisableAnalog);
        }

        fn enable_analog(&mut self) {
            self.analog = true;
            self.log(Op::EnableAnalog);
        }

        fn watchdog_config(&self) -> u8 {
            self.wdt
        }

        fn restore_watchdog(&mut self, config: u8) {
            self.wdt = config;
            self.log(Op::Restore(config));
        }

        fn configure_watchdog(&mut self, period: WatchdogPeriod) {
            self.wdt = 0x80 | period.index().unwrap_or(0);
            self.log(Op::Configure(period));
        }

        fn rearm_watchdog_interrupt(&mut self) {
            self.log(Op::Rearm);
        }

        fn disable_watchdog(&mut self) {
            self.wdt = 0;
            self.log(Op::DisableWatchdog);
        }

        fn reset_watchdog(&mut self) {
            self.log(Op::ResetWatchdog);
        }

        fn flush_diagnostics(&mut self) {
            self.log(Op::Flush);
            if self.expire_during_flush {
                self.expire_during_flush = false;
                self.expire();
            }
        }

        fn arm_deepest_sleep(&mut self) {
            self.log(Op::Arm);
        }

        fn disarm_sleep(&mut self) {
            self.log(Op::Disarm);
        }

        fn disable_interrupts(&mut self) {
            self.interrupts = false;
            self.log(Op::Cli);
        }

        fn enable_interrupts(&mut self) {
            self.interrupts = true;
            self.log(Op::Sei);
        }

        fn enter_deepest_sleep(&mut self) {
            assert!(!self.interrupts, "halt must start with interrupts masked");
            assert!(!self.flag.is_set(), "flag must be clear before halting");
            self.log(Op::Halt);
            if self.pending_expiry {
                // Halt returns at once; the handler runs as interrupts unmask.
                self.pending_expiry = false;
                on_watchdog_expiry(&self.flag);
                self.flag_sets += 1;
            } else if self.stray_before_expiry > 0 {
                self.stray_before_expiry -= 1;
            } else {
                on_watchdog_expiry(&self.flag);
                self.flag_sets += 1;
            }
        }
    }

    #[test]
    fn ladder_is_powers_of_two_from_16_to_8192() {
        let lengths: HeaplessVec<u32, 10> = WatchdogPeriod::LADDER
            .iter()
            .filter_map(|period| period.as_millis())
            .collect();
        assert_eq!(lengths.first(), Some(&MIN_WATCHDOG_MS));
        assert_eq!(lengths.last(), Some(&MAX_WATCHDOG_MS));
        for pair in lengths.windows(2) {
            assert_eq!(pair[1], pair[0] * 2);
        }
        assert_eq!(WatchdogPeriod::Forever.as_millis(), None);
        assert_eq!(WatchdogPeriod::from_index(9), Some(WatchdogPeriod::Ms8192));
        assert_eq!(WatchdogPeriod::from_index(10), None);
    }

    #[test]
    fn largest_fitting_picks_highest_rung_not_exceeding() {
        assert_eq!(WatchdogPeriod::largest_fitting(15), None);
        assert_eq!(WatchdogPeriod::largest_fitting(16), Some(WatchdogPeriod::Ms16));
        assert_eq!(WatchdogPeriod::largest_fitting(35), Some(WatchdogPeriod::Ms32));
        assert_eq!(WatchdogPeriod::largest_fitting(8_191), Some(WatchdogPeriod::Ms4096));
        assert_eq!(WatchdogPeriod::largest_fitting(u32::MAX), Some(WatchdogPeriod::Ms8192));
    }

    #[test]
    fn power_down_follows_arm_sleep_restore_sequence() {
        let mut hw = ScriptedHardware::new(0);
        let reason = PowerDownDriver::new(&mut hw).power_down(WatchdogPeriod::Ms32);

        assert_eq!(reason, WakeReason::Timer);
        assert_eq!(
            hw.ops.as_slice(),
            &[
                Op::DisableAnalog,
                Op::Cli,
                Op::Configure(WatchdogPeriod::Ms32),
                Op::Rearm,
                Op::Flush,
                Op::Arm,
                Op::Halt,
                Op::Cli,
                Op::Disarm,
                Op::ResetWatchdog,
                Op::Restore(0x40),
                Op::Sei,
                Op::EnableAnalog,
            ]
        );
        assert_eq!(hw.wdt, 0x40);
        assert!(hw.analog);
        assert!(hw.interrupts);
    }

    #[test]
    fn stray_wakes_rearm_without_resnapshot() {
        let mut hw = ScriptedHardware::new(2);
        let mut driver = PowerDownDriver::new(&mut hw);
        assert_eq!(driver.power_down(WatchdogPeriod::Ms16), WakeReason::Timer);
        assert_eq!(driver.stray_wakes(), 2);
        assert_eq!(driver.cycles(), 1);

        let halts = hw.ops.iter().filter(|op| **op == Op::Halt).count();
        let rearms = hw.ops.iter().filter(|op| **op == Op::Rearm).count();
        let snapshots = hw.ops.iter().filter(|op| **op == Op::DisableAnalog).count();
        assert_eq!(halts, 3);
        assert_eq!(rearms, 3);
        assert_eq!(snapshots, 1);
        assert_eq!(hw.flag_sets, 1);
        assert_eq!(hw.wdt, 0x40);
    }

    #[test]
    fn expiry_while_arming_ends_the_cycle_once() {
        let mut hw = ScriptedHardware::new(0);
        hw.expire_during_flush = true;
        let mut driver = PowerDownDriver::new(&mut hw);

        assert_eq!(driver.power_down(WatchdogPeriod::Ms16), WakeReason::Timer);
        assert_eq!(driver.stray_wakes(), 0);

        let halts = hw.ops.iter().filter(|op| **op == Op::Halt).count();
        assert_eq!(halts, 1);
        assert_eq!(hw.flag_sets, 1);
        assert!(hw.flag.is_set());
    }

    #[test]
    fn stale_flag_from_previous_cycle_is_cleared_before_arming() {
        let mut hw = ScriptedHardware::new(1);
        hw.flag.signal();
        let mut driver = PowerDownDriver::new(&mut hw);

        driver.power_down(WatchdogPeriod::Ms16);

        assert_eq!(driver.stray_wakes(), 1);
        assert_eq!(hw.flag_sets, 1);
    }

    #[test]
    fn forever_disables_watchdog_and_skips_rearm() {
        let mut hw = ScriptedHardware::new(1);
        let reason = PowerDownDriver::new(&mut hw).power_down(WatchdogPeriod::Forever);

        assert_eq!(reason, WakeReason::Timer);
        assert!(hw.ops.contains(&Op::DisableWatchdog));
        assert!(!hw.ops.iter().any(|op| matches!(op, Op::Configure(_) | Op::Rearm)));
        assert_eq!(hw.wdt, 0x40);
    }

    #[test]
    fn guard_preserves_disabled_analog_front_end() {
        let mut hw = ScriptedHardware::new(0);
        hw.analog = false;
        PowerDownDriver::new(&mut hw).power_down(WatchdogPeriod::Ms64);
        assert!(!hw.analog);
        assert!(!hw.ops.contains(&Op::EnableAnalog));
    }

    #[test]
    fn noop_controller_wakes_immediately() {
        let mut hw = NoopPowerController::new();
        let mut driver = PowerDownDriver::new(&mut hw);
        assert_eq!(driver.power_down(WatchdogPeriod::Ms8192), WakeReason::Timer);
        assert_eq!(driver.stray_wakes(), 0);
    }
}

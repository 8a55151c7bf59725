mod common;

use common::{SimHardware, WDT_BOOT, world};
use sleep_core::SleepOutcome;
use sleep_core::power::{PowerController, PowerDownDriver, WakeReason, WatchdogPeriod, decompose};

#[test]
fn decomposed_sleep_lands_within_one_rung_of_the_request() {
    for ms in [1u32, 16, 20, 250, 1_000, 8_191, 8_192, 8_193, 30_001] {
        let world = world();
        let mut hw = SimHardware::new(&world);
        let mut driver = PowerDownDriver::new(&mut hw);

        let report = decompose(&mut driver, ms);

        assert_eq!(report.outcome, SleepOutcome::TimerWake);
        let slept = world.borrow().now_ms;
        assert_eq!(slept, report.slept_ms);
        assert!(slept >= ms && slept < ms + 16, "{ms} slept {slept}");
    }
}

#[test]
fn every_cycle_observes_exactly_one_watchdog_expiry() {
    let world = world();
    world.borrow_mut().stray_interrupts = 3;
    let mut hw = SimHardware::new(&world);
    let mut driver = PowerDownDriver::new(&mut hw);

    let report = decompose(&mut driver, 12_345);

    let cycles = driver.cycles();
    assert_eq!(u32::from(report.intervals), cycles);
    assert_eq!(driver.stray_wakes(), 3);
    let world = world.borrow();
    assert_eq!(world.flag_sets, cycles);
    assert_eq!(u32::try_from(world.power_downs.len()), Ok(cycles));
}

#[test]
fn wake_flag_is_left_set_only_by_the_last_expiry() {
    let world = world();
    let mut hw = SimHardware::new(&world);

    let reason = PowerDownDriver::new(&mut hw).power_down(WatchdogPeriod::Ms256);

    assert_eq!(reason, WakeReason::Timer);
    assert!(hw.wake_flag().is_set());

    hw.wake_flag().clear();
    PowerDownDriver::new(&mut hw).power_down(WatchdogPeriod::Ms16);
    assert_eq!(world.borrow().flag_sets, 2);
}

#[test]
fn forever_power_down_restores_the_running_watchdog() {
    let world = world();
    let mut hw = SimHardware::new(&world);

    PowerDownDriver::new(&mut hw).power_down(WatchdogPeriod::Forever);

    let world = world.borrow();
    assert_eq!(world.wdt_register, WDT_BOOT);
    assert!(world.analog_enabled);
    assert!(world.interrupts_enabled);
}

//! Simulated node shared by the integration tests.
//!
//! Every collaborator reads and advances one virtual millisecond clock, so
//! tests can assert on elapsed time without sleeping for real.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use sleep_core::policy::{
    Capabilities, Clock, FirmwareUpdate, Indication, Indicator, SleepConfig, SleepNotification,
    SleepPolicyController, Transport,
};
use sleep_core::power::{PowerController, WakeFlag, WatchdogPeriod, on_watchdog_expiry};

/// Power-on value of the simulated watchdog control register.
pub const WDT_BOOT: u8 = 0x18;

#[derive(Debug, Default)]
pub struct World {
    pub now_ms: u32,
    pub transport_ready_at: Option<u32>,
    pub ota_window: Option<(u32, u32)>,
    pub stray_interrupts: u32,
    pub forever_event_after_ms: u32,
    pub blink_steps: u32,
    pub wdt_register: u8,
    pub analog_enabled: bool,
    pub interrupts_enabled: bool,
    pub sleep_armed: bool,
    pub power_downs: Vec<WatchdogPeriod>,
    pub halts: u32,
    pub flag_sets: u32,
    pub process_ticks: u32,
    pub sent: Vec<(u32, SleepNotification)>,
    pub trace: Vec<&'static str>,
}

impl World {
    pub fn transport_ready(&self) -> bool {
        self.transport_ready_at.is_some_and(|at| self.now_ms >= at)
    }

    pub fn ota_ongoing(&self) -> bool {
        self.ota_window
            .is_some_and(|(start, end)| self.now_ms >= start && self.now_ms < end)
    }

    /// Observable hardware configuration: watchdog register, analog enable,
    /// interrupt enable.
    pub fn hardware_state(&self) -> (u8, bool, bool) {
        (self.wdt_register, self.analog_enabled, self.interrupts_enabled)
    }

    pub fn slept_ms(&self) -> u32 {
        self.power_downs
            .iter()
            .filter_map(|period| period.as_millis())
            .sum()
    }
}

pub type SharedWorld = Rc<RefCell<World>>;

pub fn world() -> SharedWorld {
    Rc::new(RefCell::new(World {
        transport_ready_at: Some(0),
        forever_event_after_ms: 60_000,
        wdt_register: WDT_BOOT,
        analog_enabled: true,
        interrupts_enabled: true,
        ..World::default()
    }))
}

pub struct SimHardware {
    world: SharedWorld,
    flag: WakeFlag,
    period: Option<WatchdogPeriod>,
}

impl SimHardware {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: Rc::clone(world),
            flag: WakeFlag::new(),
            period: None,
        }
    }
}

impl PowerController for SimHardware {
    type WatchdogConfig = u8;

    fn wake_flag(&self) -> &WakeFlag {
        &self.flag
    }

    fn analog_enabled(&self) -> bool {
        self.world.borrow().analog_enabled
    }

    fn disable_analog(&mut self) {
        self.world.borrow_mut().analog_enabled = false;
    }

    fn enable_analog(&mut self) {
        self.world.borrow_mut().analog_enabled = true;
    }

    fn watchdog_config(&self) -> u8 {
        self.world.borrow().wdt_register
    }

    fn restore_watchdog(&mut self, config: u8) {
        self.world.borrow_mut().wdt_register = config;
        self.period = None;
    }

    fn configure_watchdog(&mut self, period: WatchdogPeriod) {
        self.period = Some(period);
        self.world.borrow_mut().wdt_register = 0x40 | period.index().unwrap_or(0);
    }

    fn rearm_watchdog_interrupt(&mut self) {
        self.world.borrow_mut().wdt_register |= 0x40;
    }

    fn disable_watchdog(&mut self) {
        self.period = Some(WatchdogPeriod::Forever);
        self.world.borrow_mut().wdt_register = 0;
    }

    fn reset_watchdog(&mut self) {}

    fn flush_diagnostics(&mut self) {}

    fn arm_deepest_sleep(&mut self) {
        self.world.borrow_mut().sleep_armed = true;
    }

    fn disarm_sleep(&mut self) {
        self.world.borrow_mut().sleep_armed = false;
    }

    fn disable_interrupts(&mut self) {
        self.world.borrow_mut().interrupts_enabled = false;
    }

    fn enable_interrupts(&mut self) {
        self.world.borrow_mut().interrupts_enabled = true;
    }

    fn enter_deepest_sleep(&mut self) {
        let period = self.period.expect("halt without a configured watchdog");
        let mut world = self.world.borrow_mut();
        assert!(world.sleep_armed, "halt before arming the sleep mode");
        world.interrupts_enabled = true;
        world.halts += 1;

        if world.stray_interrupts > 0 {
            world.stray_interrupts -= 1;
            return;
        }

        let elapsed = period.as_millis().unwrap_or(world.forever_event_after_ms);
        world.now_ms = world.now_ms.wrapping_add(elapsed);
        world.power_downs.push(period);
        world.flag_sets += 1;
        world.trace.push("power-down");
        drop(world);
        on_watchdog_expiry(&self.flag);
    }
}

pub struct SimClock(SharedWorld);

impl Clock for SimClock {
    fn now_ms(&mut self) -> u32 {
        self.0.borrow().now_ms
    }

    fn wait_ms(&mut self, duration_ms: u32) {
        let mut world = self.0.borrow_mut();
        world.now_ms = world.now_ms.wrapping_add(duration_ms);
    }
}

pub struct SimTransport(SharedWorld);

impl Transport for SimTransport {
    fn is_ready(&mut self) -> bool {
        self.0.borrow().transport_ready()
    }

    fn disable(&mut self) {
        self.0.borrow_mut().trace.push("transport-disable");
    }

    fn reinitialise(&mut self) {
        self.0.borrow_mut().trace.push("transport-reinit");
    }

    /// Each processing tick costs one millisecond.
    fn process(&mut self) {
        let mut world = self.0.borrow_mut();
        world.process_ticks += 1;
        world.now_ms = world.now_ms.wrapping_add(1);
    }

    fn send_route(&mut self, notification: SleepNotification) -> bool {
        let mut world = self.0.borrow_mut();
        let now = world.now_ms;
        world.sent.push((now, notification));
        world.transport_ready()
    }
}

pub struct SimFirmwareUpdate(SharedWorld);

impl FirmwareUpdate for SimFirmwareUpdate {
    fn is_update_ongoing(&mut self) -> bool {
        self.0.borrow().ota_ongoing()
    }
}

pub struct SimIndicator(SharedWorld);

impl Indicator for SimIndicator {
    fn set_indication(&mut self, indication: Indication) {
        let label = match indication {
            Indication::Sleep => "indicate-sleep",
            Indication::Wakeup => "indicate-wakeup",
        };
        self.0.borrow_mut().trace.push(label);
    }

    fn is_blinking(&mut self) -> bool {
        self.0.borrow().blink_steps > 0
    }

    fn step(&mut self) {
        let mut world = self.0.borrow_mut();
        world.blink_steps -= 1;
        world.trace.push("blink-step");
    }
}

pub type SimController =
    SleepPolicyController<SimHardware, SimClock, SimTransport, SimFirmwareUpdate, SimIndicator>;

pub fn controller(world: &SharedWorld, capabilities: Capabilities) -> SimController {
    controller_with_config(world, capabilities, SleepConfig::default())
}

pub fn controller_with_config(
    world: &SharedWorld,
    capabilities: Capabilities,
    config: SleepConfig,
) -> SimController {
    SleepPolicyController::new(SimHardware::new(world), SimClock(Rc::clone(world)), capabilities)
        .with_config(config)
        .with_transport(SimTransport(Rc::clone(world)))
        .with_firmware_update(SimFirmwareUpdate(Rc::clone(world)))
        .with_indicator(SimIndicator(Rc::clone(world)))
}

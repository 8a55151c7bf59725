//! Virtual sensor node driven by the emulator session.
//!
//! All collaborators share one [`NodeState`] and one virtual millisecond
//! clock. Power-downs advance the clock by the programmed watchdog interval
//! instead of blocking, and every hardware-visible step is narrated into
//! [`NodeState::events`] so the session can echo it.

use std::cell::RefCell;
use std::rc::Rc;

use sleep_core::policy::{
    Capabilities, Clock, FirmwareUpdate, Indication, Indicator, SleepNotification,
    SleepPolicyController, Transport,
};
use sleep_core::power::{PowerController, WakeFlag, WatchdogPeriod, on_watchdog_expiry};

/// Watchdog control register value at power-on.
pub const WDT_CONTROL_BOOT: u8 = 0x00;
/// How long an indefinite power-down lasts before an external event ends it.
pub const EXTERNAL_EVENT_AFTER_MS: u32 = 5_000;
/// Steps in each LED pattern.
const BLINK_STEPS: u8 = 2;

const WDT_INTERRUPT_ENABLE: u8 = 0x40;
const WDT_ENABLE: u8 = 0x08;

#[derive(Debug)]
pub struct NodeState {
    pub now_ms: u32,
    /// Network link condition, independent of the radio power state.
    pub link_up: bool,
    /// Link comes up once the clock reaches this time.
    pub link_up_at: Option<u32>,
    pub radio_powered: bool,
    pub ota_active: bool,
    pub stray_pending: u32,
    pub wdt_control: u8,
    pub analog_enabled: bool,
    pub interrupts_enabled: bool,
    pub sleep_armed: bool,
    pub blink_steps: u8,
    pub events: Vec<String>,
}

impl NodeState {
    pub fn link_ready(&self) -> bool {
        self.link_up || self.link_up_at.is_some_and(|at| self.now_ms >= at)
    }

    fn narrate(&mut self, line: String) {
        self.events.push(format!("[{:>8} ms] {line}", self.now_ms));
    }

    /// Returns and clears the narration gathered since the previous call.
    pub fn take_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.events)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            now_ms: 0,
            link_up: true,
            link_up_at: None,
            radio_powered: true,
            ota_active: false,
            stray_pending: 0,
            wdt_control: WDT_CONTROL_BOOT,
            analog_enabled: true,
            interrupts_enabled: true,
            sleep_armed: false,
            blink_steps: 0,
            events: Vec::new(),
        }
    }
}

pub type SharedNode = Rc<RefCell<NodeState>>;

pub fn shared_node() -> SharedNode {
    Rc::new(RefCell::new(NodeState::default()))
}

pub struct VirtualPower {
    node: SharedNode,
    flag: WakeFlag,
    period: WatchdogPeriod,
}

impl VirtualPower {
    pub fn new(node: &SharedNode) -> Self {
        Self {
            node: Rc::clone(node),
            flag: WakeFlag::new(),
            period: WatchdogPeriod::Forever,
        }
    }
}

impl PowerController for VirtualPower {
    type WatchdogConfig = u8;

    fn wake_flag(&self) -> &WakeFlag {
        &self.flag
    }

    fn analog_enabled(&self) -> bool {
        self.node.borrow().analog_enabled
    }

    fn disable_analog(&mut self) {
        self.node.borrow_mut().analog_enabled = false;
    }

    fn enable_analog(&mut self) {
        self.node.borrow_mut().analog_enabled = true;
    }

    fn watchdog_config(&self) -> u8 {
        self.node.borrow().wdt_control
    }

    fn restore_watchdog(&mut self, config: u8) {
        self.node.borrow_mut().wdt_control = config;
        self.period = WatchdogPeriod::Forever;
    }

    fn configure_watchdog(&mut self, period: WatchdogPeriod) {
        self.period = period;
        let Some(index) = period.index() else {
            self.disable_watchdog();
            return;
        };
        self.node.borrow_mut().wdt_control = WDT_INTERRUPT_ENABLE | WDT_ENABLE | index;
    }

    fn rearm_watchdog_interrupt(&mut self) {
        self.node.borrow_mut().wdt_control |= WDT_INTERRUPT_ENABLE;
    }

    fn disable_watchdog(&mut self) {
        self.period = WatchdogPeriod::Forever;
        self.node.borrow_mut().wdt_control = 0;
    }

    fn reset_watchdog(&mut self) {}

    fn flush_diagnostics(&mut self) {}

    fn arm_deepest_sleep(&mut self) {
        self.node.borrow_mut().sleep_armed = true;
    }

    fn disarm_sleep(&mut self) {
        self.node.borrow_mut().sleep_armed = false;
    }

    fn disable_interrupts(&mut self) {
        self.node.borrow_mut().interrupts_enabled = false;
    }

    fn enable_interrupts(&mut self) {
        self.node.borrow_mut().interrupts_enabled = true;
    }

    fn enter_deepest_sleep(&mut self) {
        let mut node = self.node.borrow_mut();
        node.interrupts_enabled = true;

        if node.stray_pending > 0 {
            node.stray_pending -= 1;
            node.narrate("cpu: woken by a stray interrupt".to_string());
            return;
        }

        match self.period.as_millis() {
            Some(ms) => {
                node.now_ms = node.now_ms.wrapping_add(ms);
                node.narrate(format!("wdt: expired after {ms} ms"));
            }
            None => {
                node.now_ms = node.now_ms.wrapping_add(EXTERNAL_EVENT_AFTER_MS);
                node.narrate("cpu: woken by an external event".to_string());
            }
        }
        drop(node);
        on_watchdog_expiry(&self.flag);
    }
}

pub struct VirtualClock(SharedNode);

impl Clock for VirtualClock {
    fn now_ms(&mut self) -> u32 {
        self.0.borrow().now_ms
    }

    fn wait_ms(&mut self, duration_ms: u32) {
        if duration_ms == 0 {
            return;
        }
        let mut node = self.0.borrow_mut();
        node.now_ms = node.now_ms.wrapping_add(duration_ms);
        node.narrate(format!("wait: {duration_ms} ms"));
    }
}

pub struct VirtualRadio(SharedNode);

impl Transport for VirtualRadio {
    fn is_ready(&mut self) -> bool {
        let node = self.0.borrow();
        node.radio_powered && node.link_ready()
    }

    fn disable(&mut self) {
        let mut node = self.0.borrow_mut();
        node.radio_powered = false;
        node.narrate("radio: powered down".to_string());
    }

    fn reinitialise(&mut self) {
        let mut node = self.0.borrow_mut();
        node.radio_powered = true;
        node.narrate("radio: reinitialised".to_string());
    }

    /// One stack tick; costs a millisecond of virtual time.
    fn process(&mut self) {
        let mut node = self.0.borrow_mut();
        node.now_ms = node.now_ms.wrapping_add(1);
    }

    fn send_route(&mut self, notification: SleepNotification) -> bool {
        let mut node = self.0.borrow_mut();
        let delivered = node.radio_powered && node.link_ready();
        let line = match notification {
            SleepNotification::PreSleep { window_ms } => {
                format!("radio: pre-sleep notice, listening {window_ms} ms (delivered={delivered})")
            }
            SleepNotification::PostSleep { slept_ms } => {
                format!("radio: post-sleep notice, slept {slept_ms} ms (delivered={delivered})")
            }
        };
        node.narrate(line);
        delivered
    }
}

pub struct VirtualOta(SharedNode);

impl FirmwareUpdate for VirtualOta {
    fn is_update_ongoing(&mut self) -> bool {
        self.0.borrow().ota_active
    }
}

pub struct VirtualLed(SharedNode);

impl Indicator for VirtualLed {
    fn set_indication(&mut self, indication: Indication) {
        let mut node = self.0.borrow_mut();
        node.blink_steps = BLINK_STEPS;
        let label = match indication {
            Indication::Sleep => "sleep",
            Indication::Wakeup => "wakeup",
        };
        node.narrate(format!("led: {label} pattern"));
    }

    fn is_blinking(&mut self) -> bool {
        self.0.borrow().blink_steps > 0
    }

    fn step(&mut self) {
        let mut node = self.0.borrow_mut();
        node.blink_steps = node.blink_steps.saturating_sub(1);
    }
}

pub type VirtualController =
    SleepPolicyController<VirtualPower, VirtualClock, VirtualRadio, VirtualOta, VirtualLed>;

pub fn controller(node: &SharedNode, capabilities: Capabilities) -> VirtualController {
    SleepPolicyController::new(
        VirtualPower::new(node),
        VirtualClock(Rc::clone(node)),
        capabilities,
    )
    .with_transport(VirtualRadio(Rc::clone(node)))
    .with_firmware_update(VirtualOta(Rc::clone(node)))
    .with_indicator(VirtualLed(Rc::clone(node)))
}

//! Board-side collaborators of the sleep policy.

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Instant, block_for};
use sleep_core::policy::{Clock, Indication, Indicator};

/// Millisecond clock on top of the embassy time driver.
///
/// TIM1 halts in Stop mode, so this clock only measures awake time; the
/// power-down driver reports slept time separately.
#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&mut self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn wait_ms(&mut self, duration_ms: u32) {
        block_for(Duration::from_millis(u64::from(duration_ms)));
    }
}

const BLINK_STEP_MS: u64 = 40;
const SLEEP_BLINK_STEPS: u8 = 4;
const WAKEUP_BLINK_STEPS: u8 = 2;

/// Status LED that plays a short blink pattern per indication.
pub struct LedIndicator<'d> {
    led: Output<'d>,
    steps_left: u8,
}

impl<'d> LedIndicator<'d> {
    pub fn new(led: Output<'d>) -> Self {
        Self { led, steps_left: 0 }
    }
}

impl Indicator for LedIndicator<'_> {
    fn set_indication(&mut self, indication: Indication) {
        self.led.set_low();
        self.steps_left = match indication {
            Indication::Sleep => SLEEP_BLINK_STEPS,
            Indication::Wakeup => WAKEUP_BLINK_STEPS,
        };
    }

    fn is_blinking(&mut self) -> bool {
        self.steps_left > 0
    }

    fn step(&mut self) {
        if self.steps_left == 0 {
            return;
        }
        self.led.toggle();
        block_for(Duration::from_millis(BLINK_STEP_MS));
        self.steps_left -= 1;
        if self.steps_left == 0 {
            self.led.set_low();
        }
    }
}

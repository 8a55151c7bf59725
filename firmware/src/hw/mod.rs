//! Register-level access to the STM32G0B1 blocks the sleep path touches.
//!
//! Embassy owns clocks, GPIO and the ADC driver; the low-power controller,
//! the RTC wake-up timer and the EXTI mask are reached directly through the
//! volatile helpers below because the HAL does not expose Stop-mode entry.

pub mod power;
pub mod vrefint;

use core::ptr;

/// One 32-bit memory-mapped register.
#[derive(Copy, Clone)]
pub(crate) struct Reg(usize);

impl Reg {
    pub(crate) const fn at(base: usize, offset: usize) -> Self {
        Self(base + offset)
    }

    pub(crate) fn read(self) -> u32 {
        // SAFETY: only constructed for peripheral addresses of this MCU.
        unsafe { ptr::read_volatile(self.0 as *const u32) }
    }

    pub(crate) fn write(self, value: u32) {
        // SAFETY: see `read`.
        unsafe { ptr::write_volatile(self.0 as *mut u32, value) }
    }

    pub(crate) fn modify(self, f: impl FnOnce(u32) -> u32) {
        self.write(f(self.read()));
    }

    pub(crate) fn set_bits(self, mask: u32) {
        self.modify(|value| value | mask);
    }

    pub(crate) fn clear_bits(self, mask: u32) {
        self.modify(|value| value & !mask);
    }

    pub(crate) fn is_set(self, mask: u32) -> bool {
        self.read() & mask != 0
    }

    /// Spins until every bit in `mask` reads as `set`.
    pub(crate) fn wait_for(self, mask: u32, set: bool) {
        while self.is_set(mask) != set {}
    }
}

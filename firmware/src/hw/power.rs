//! Stop-mode power controller for the STM32G0B1.
//!
//! The RTC wake-up timer, clocked from the 32 kHz LSI, stands in for a
//! watchdog ladder: it keeps running in Stop 1, raises `RTC_TAMP` on expiry
//! and wakes the core through EXTI line 19. Its interrupt handler is the only
//! writer of [`WAKE_FLAG`].

use cortex_m::asm;
use cortex_m::interrupt as cpu;
use cortex_m::peripheral::SCB;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::InterruptExt;
use sleep_core::power::{PowerController, WakeFlag, WatchdogPeriod, on_watchdog_expiry};

use super::Reg;

/// Set by the RTC wake-up interrupt, consumed by the power-down loop.
pub static WAKE_FLAG: WakeFlag = WakeFlag::new();

const RCC_BASE: usize = 0x4002_1000;
const RCC_BDCR: Reg = Reg::at(RCC_BASE, 0x5C);
const RCC_CSR: Reg = Reg::at(RCC_BASE, 0x60);
const RCC_APBENR1: Reg = Reg::at(RCC_BASE, 0x3C);

const RCC_APBENR1_RTCAPBEN: u32 = 1 << 10;
const RCC_APBENR1_PWREN: u32 = 1 << 28;
const RCC_CSR_LSION: u32 = 1 << 0;
const RCC_CSR_LSIRDY: u32 = 1 << 1;
const RCC_BDCR_RTCSEL_MASK: u32 = 0b11 << 8;
const RCC_BDCR_RTCSEL_LSI: u32 = 0b10 << 8;
const RCC_BDCR_RTCEN: u32 = 1 << 15;
const RCC_BDCR_BDRST: u32 = 1 << 16;

const PWR_CR1: Reg = Reg::at(0x4000_7000, 0x00);
const PWR_CR1_LPMS_MASK: u32 = 0b111;
const PWR_CR1_LPMS_STOP1: u32 = 0b001;
const PWR_CR1_DBP: u32 = 1 << 8;

const RTC_BASE: usize = 0x4000_2800;
const RTC_ICSR: Reg = Reg::at(RTC_BASE, 0x0C);
const RTC_WUTR: Reg = Reg::at(RTC_BASE, 0x14);
const RTC_CR: Reg = Reg::at(RTC_BASE, 0x18);
const RTC_WPR: Reg = Reg::at(RTC_BASE, 0x24);
const RTC_SR: Reg = Reg::at(RTC_BASE, 0x50);
const RTC_SCR: Reg = Reg::at(RTC_BASE, 0x5C);

const RTC_ICSR_WUTWF: u32 = 1 << 2;
const RTC_CR_WUCKSEL_MASK: u32 = 0b111;
const RTC_CR_WUTE: u32 = 1 << 10;
const RTC_CR_WUTIE: u32 = 1 << 14;
const RTC_SR_WUTF: u32 = 1 << 2;
const RTC_SCR_CWUTF: u32 = 1 << 2;

/// RTCCLK / 16 with a 32 kHz LSI.
const WAKE_TIMER_TICKS_PER_MS: u32 = 2;

const EXTI_IMR1: Reg = Reg::at(0x4002_1800, 0x80);
const EXTI_LINE_RTC_WAKEUP: u32 = 1 << 19;

const ADC_BASE: usize = 0x4001_2400;
const ADC_ISR: Reg = Reg::at(ADC_BASE, 0x00);
const ADC_CR: Reg = Reg::at(ADC_BASE, 0x08);
const ADC_ISR_ADRDY: u32 = 1 << 0;
const ADC_CR_ADEN: u32 = 1 << 0;
const ADC_CR_ADDIS: u32 = 1 << 1;

/// Snapshot of the wake-up timer registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, defmt::Format)]
pub struct WakeTimerConfig {
    cr: u32,
    wutr: u32,
}

/// [`PowerController`] backed by the RTC wake-up timer and Stop 1 mode.
pub struct Stm32PowerController {
    scb: SCB,
    wake: &'static WakeFlag,
}

impl Stm32PowerController {
    /// Starts the LSI, routes it to the RTC and unmasks the wake-up line.
    pub fn new(scb: SCB) -> Self {
        RCC_APBENR1.set_bits(RCC_APBENR1_PWREN | RCC_APBENR1_RTCAPBEN);
        PWR_CR1.set_bits(PWR_CR1_DBP);

        RCC_CSR.set_bits(RCC_CSR_LSION);
        RCC_CSR.wait_for(RCC_CSR_LSIRDY, true);

        let bdcr = RCC_BDCR.read();
        if bdcr & RCC_BDCR_RTCSEL_MASK != RCC_BDCR_RTCSEL_LSI {
            // RTCSEL is write-once until the backup domain is reset.
            if bdcr & RCC_BDCR_RTCSEL_MASK != 0 {
                RCC_BDCR.set_bits(RCC_BDCR_BDRST);
                RCC_BDCR.clear_bits(RCC_BDCR_BDRST);
            }
            RCC_BDCR.modify(|value| (value & !RCC_BDCR_RTCSEL_MASK) | RCC_BDCR_RTCSEL_LSI);
        }
        RCC_BDCR.set_bits(RCC_BDCR_RTCEN);

        EXTI_IMR1.set_bits(EXTI_LINE_RTC_WAKEUP);
        interrupt::RTC_TAMP.unpend();
        // SAFETY: the handler below only touches the RTC flag and WAKE_FLAG.
        unsafe { interrupt::RTC_TAMP.enable() };

        defmt::debug!("power: wake timer on LSI");
        Self {
            scb,
            wake: &WAKE_FLAG,
        }
    }

    fn unlock_rtc() {
        RTC_WPR.write(0xCA);
        RTC_WPR.write(0x53);
    }

    fn lock_rtc() {
        RTC_WPR.write(0xFF);
    }

    /// Stops the wake-up timer and waits until WUTR accepts writes.
    fn stop_wake_timer() {
        RTC_CR.clear_bits(RTC_CR_WUTE | RTC_CR_WUTIE);
        RTC_ICSR.wait_for(RTC_ICSR_WUTWF, true);
    }
}

impl PowerController for Stm32PowerController {
    type WatchdogConfig = WakeTimerConfig;

    fn wake_flag(&self) -> &WakeFlag {
        self.wake
    }

    fn analog_enabled(&self) -> bool {
        ADC_CR.is_set(ADC_CR_ADEN)
    }

    fn disable_analog(&mut self) {
        if ADC_CR.is_set(ADC_CR_ADEN) {
            ADC_CR.set_bits(ADC_CR_ADDIS);
            ADC_CR.wait_for(ADC_CR_ADEN, false);
        }
    }

    fn enable_analog(&mut self) {
        ADC_ISR.write(ADC_ISR_ADRDY);
        ADC_CR.set_bits(ADC_CR_ADEN);
        ADC_ISR.wait_for(ADC_ISR_ADRDY, true);
    }

    fn watchdog_config(&self) -> WakeTimerConfig {
        WakeTimerConfig {
            cr: RTC_CR.read(),
            wutr: RTC_WUTR.read(),
        }
    }

    fn restore_watchdog(&mut self, config: WakeTimerConfig) {
        Self::unlock_rtc();
        Self::stop_wake_timer();
        RTC_WUTR.write(config.wutr);
        RTC_SCR.write(RTC_SCR_CWUTF);
        RTC_CR.write(config.cr);
        Self::lock_rtc();
    }

    fn configure_watchdog(&mut self, period: WatchdogPeriod) {
        let Some(ms) = period.as_millis() else {
            self.disable_watchdog();
            return;
        };

        Self::unlock_rtc();
        Self::stop_wake_timer();
        RTC_WUTR.write(ms * WAKE_TIMER_TICKS_PER_MS - 1);
        RTC_CR.clear_bits(RTC_CR_WUCKSEL_MASK);
        RTC_SCR.write(RTC_SCR_CWUTF);
        RTC_CR.set_bits(RTC_CR_WUTIE | RTC_CR_WUTE);
        Self::lock_rtc();
    }

    fn rearm_watchdog_interrupt(&mut self) {
        Self::unlock_rtc();
        RTC_CR.set_bits(RTC_CR_WUTIE);
        Self::lock_rtc();
    }

    fn disable_watchdog(&mut self) {
        Self::unlock_rtc();
        Self::stop_wake_timer();
        Self::lock_rtc();
    }

    fn reset_watchdog(&mut self) {
        RTC_SCR.write(RTC_SCR_CWUTF);
    }

    fn flush_diagnostics(&mut self) {
        defmt::flush();
    }

    fn arm_deepest_sleep(&mut self) {
        PWR_CR1.modify(|value| (value & !PWR_CR1_LPMS_MASK) | PWR_CR1_LPMS_STOP1);
        self.scb.set_sleepdeep();
    }

    fn disarm_sleep(&mut self) {
        self.scb.clear_sleepdeep();
    }

    fn disable_interrupts(&mut self) {
        cpu::disable();
    }

    fn enable_interrupts(&mut self) {
        // SAFETY: no critical section is held across a power-down call.
        unsafe { cpu::enable() };
    }

    fn enter_deepest_sleep(&mut self) {
        // WFI with PRIMASK set still wakes on a pending interrupt, which is
        // then taken as soon as PRIMASK clears.
        asm::dsb();
        asm::wfi();
        // SAFETY: see `enable_interrupts`.
        unsafe { cpu::enable() };
    }
}

#[interrupt]
fn RTC_TAMP() {
    if RTC_SR.is_set(RTC_SR_WUTF) {
        RTC_SCR.write(RTC_SCR_CWUTF);
        on_watchdog_expiry(&WAKE_FLAG);
    }
}

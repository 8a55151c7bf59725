//! Supply-rail measurement through the internal voltage reference.
//!
//! The node logs VDD before every sleep so a draining battery shows up in the
//! telemetry stream. The ADC is released again before the power-down driver
//! switches the analog front end off.

use core::ptr;

use embassy_stm32::adc::{Adc, SampleTime, VrefInt};
use embassy_stm32::peripherals::ADC1;

/// Factory-programmed calibration constant sampled at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;
/// Supply voltage the calibration constant was taken at.
const VREFINT_CAL_VDD_MV: u32 = 3_000;

/// Reads the factory-trimmed VREFINT calibration constant.
pub fn read_vrefint_calibration() -> u16 {
    // SAFETY: fixed address in system memory, always readable.
    unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
}

/// Calibrated VDD estimate from a raw VREFINT conversion.
pub fn vdd_millivolts(calibration: u16, reading: u16) -> Option<u32> {
    if reading == 0 {
        return None;
    }
    Some(VREFINT_CAL_VDD_MV * u32::from(calibration) / u32::from(reading))
}

/// Embassy ADC wrapper that samples VREFINT on demand.
pub struct SupplyMonitor<'d> {
    adc: Adc<'d, ADC1>,
    channel: VrefInt,
    calibration: u16,
    discard_next: bool,
}

impl<'d> SupplyMonitor<'d> {
    /// Constructs a new monitor and enables the internal voltage reference.
    pub fn new(mut adc: Adc<'d, ADC1>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let channel = adc.enable_vrefint();
        Self {
            adc,
            channel,
            calibration: read_vrefint_calibration(),
            discard_next: true,
        }
    }

    /// Current supply voltage in millivolts.
    pub fn sample_millivolts(&mut self) -> Option<u32> {
        // First conversion after the reference powers up is unreliable.
        if self.discard_next {
            let _ = self.read_once();
            self.discard_next = false;
        }

        let reading = self.read_once();
        vdd_millivolts(self.calibration, reading)
    }

    /// The analog front end is powered down across sleeps; resample the
    /// reference on the next measurement.
    pub fn invalidate(&mut self) {
        self.discard_next = true;
    }

    fn read_once(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.channel)
    }
}

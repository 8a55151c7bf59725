#![no_std]

// Sleep orchestration shared by the sensor-node firmware and host tooling.
//
// This crate stays portable across MCU firmware and the host emulator by
// avoiding the Rust standard library and reaching hardware only through the
// traits in `power` and `policy`.

mod fmt;

pub mod policy;
pub mod power;
pub mod telemetry;

pub use policy::{SleepOutcome, SleepPolicyController, SleepRequest};
pub use power::{PowerController, WakeFlag, WakeReason, WatchdogPeriod};

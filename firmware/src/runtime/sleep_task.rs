use sleep_core::policy::{
    NoopFirmwareUpdate, NoopTransport, SleepOutcome, SleepPolicyController, SleepRequest,
};

use crate::hw::power::Stm32PowerController;
use crate::hw::vrefint::SupplyMonitor;
use crate::node::{EmbassyClock, LedIndicator};
use crate::telemetry::{TelemetryCursor, log_stats};

/// Time between two supply reports.
const REPORT_INTERVAL_MS: u32 = 60_000;

pub type NodeController = SleepPolicyController<
    Stm32PowerController,
    EmbassyClock,
    NoopTransport,
    NoopFirmwareUpdate,
    LedIndicator<'static>,
>;

#[embassy_executor::task]
pub async fn run(mut controller: NodeController, mut supply: SupplyMonitor<'static>) -> ! {
    let mut cursor = TelemetryCursor::new();
    loop {
        match supply.sample_millivolts() {
            Some(vdd) => defmt::info!("supply: vdd={}mV", vdd),
            None => defmt::warn!("supply: no VREFINT reading"),
        }

        let outcome = controller.request_sleep(SleepRequest::new(REPORT_INTERVAL_MS));
        supply.invalidate();
        if outcome == SleepOutcome::NotPossible {
            defmt::warn!("sleep: {}", outcome.label());
        }

        cursor.drain(controller.telemetry());
        log_stats(controller.telemetry());
    }
}

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Level, Output, Speed};
use sleep_core::policy::{Capabilities, SleepPolicyController};

use crate::hw::power::Stm32PowerController;
use crate::hw::vrefint::SupplyMonitor;
use crate::node::{EmbassyClock, LedIndicator};

mod sleep_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals { PA5, ADC1, .. } = hal::init(config);
    let core = cortex_m::Peripherals::take().expect("core peripherals already taken");

    let controller = SleepPolicyController::new(
        Stm32PowerController::new(core.SCB),
        EmbassyClock,
        Capabilities::standalone(),
    )
    .with_indicator(LedIndicator::new(Output::new(PA5, Level::Low, Speed::Low)));
    let supply = SupplyMonitor::new(Adc::new(ADC1));

    spawner
        .spawn(sleep_task::run(controller, supply))
        .expect("failed to spawn sleep task");

    core::future::pending::<()>().await;
}

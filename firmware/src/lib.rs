#![no_std]

//! Firmware library: board wiring and tasks for the pulse meter

pub use embassy_executor::Spawner;
pub use embassy_time::Duration;

pub use meter_core::*;

pub use crate::ch32v203_hardware::*;
pub use crate::tasks::*;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

meter_core::interrupt_registry!(
    /// Owner of every interrupt-capable GPIO on the board
    pub static REGISTRY
);

/// Interrupt-visible half of the board's meter
pub static FRONTEND: PulseFrontend<MeterClock> = PulseFrontend::new(meter_core::hal::EmbassyClock);

/// Requests from the rest of the firmware to the meter task
pub static CONTROL: Signal<CriticalSectionRawMutex, MeterCommand> = Signal::new();

/// Interval between read cycles
pub const READ_INTERVAL: Duration = Duration::from_secs(6);

/// The board's meter
pub type Meter = PulseMeter<MeterClock, ExtiInterrupts, SelectPin>;

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeterCommand {
    /// Network link came up; gated sampling may start
    LinkUp,
    /// Network link lost
    LinkDown,
    /// Reference load applied: back-solve the ratio for `channel`
    Calibrate { channel: Channel, expected: f64 },
    ResetEnergy,
}

/// Meter on the board pins with the default configuration
pub fn board_meter() -> Result<Meter, MeterError> {
    let pins = PinAssignment::new(
        pins::SEL_PIN,
        pins::CF1_PIN,
        pins::CF_PIN,
        pins::SEL_HIGH_MEANS_CURRENT,
    )?;
    let meter = PulseMeter::new(
        &FRONTEND,
        &REGISTRY,
        ExtiInterrupts::new(),
        SelectPin::new(pins::SEL_PIN),
        default_config(),
    );
    Ok(meter.with_pins(pins))
}

// Embassy tasks module
pub mod tasks {
    use super::*;
    use embassy_futures::select::{select, Either};
    use embassy_time::{Delay, Instant, Timer};
    use heapless::Vec;
    use meter_core::sensor::MAX_SLOTS;

    /// Read the meter every `READ_INTERVAL` and serve `CONTROL` requests
    #[embassy_executor::task]
    pub async fn meter_task(mut meter: Meter) {
        #[cfg(feature = "defmt")]
        defmt::info!("Meter task started");

        if let Err(_e) = meter.begin() {
            #[cfg(feature = "defmt")]
            defmt::error!("Meter init failed: {}", _e);
            return;
        }

        let mut readings: Vec<Reading, MAX_SLOTS> = Vec::new();
        let mut next_read = Instant::now() + READ_INTERVAL;

        loop {
            match select(Timer::at(next_read), CONTROL.wait()).await {
                Either::First(()) => {
                    next_read += READ_INTERVAL;
                    match read_cycle(&mut meter, &mut readings) {
                        Ok(()) => report(&readings),
                        Err(_e) => {
                            #[cfg(feature = "defmt")]
                            defmt::warn!("Read cycle failed: {}", _e);
                        }
                    }
                }
                Either::Second(command) => {
                    if let Err(_e) = execute(&mut meter, command).await {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("{} failed: {}", command, _e);
                    }
                }
            }
        }
    }

    async fn execute(meter: &mut Meter, command: MeterCommand) -> Result<(), MeterError> {
        match command {
            MeterCommand::LinkUp => meter.link_established(),
            MeterCommand::LinkDown => meter.link_lost(),
            MeterCommand::Calibrate { channel, expected } => {
                meter
                    .calibrate_from_expected_async(channel, expected, &mut Delay)
                    .await?;
                Ok(())
            }
            MeterCommand::ResetEnergy => {
                meter.reset_energy();
                Ok(())
            }
        }
    }

    fn report(readings: &[Reading]) {
        for _reading in readings {
            #[cfg(feature = "defmt")]
            defmt::info!("{} = {} {}", _reading.magnitude, _reading.value, _reading.magnitude.unit());
        }
    }
}

// CH32V203 hardware module
pub mod ch32v203_hardware;

// Time driver for embassy
#[cfg(target_arch = "riscv32")]
pub mod time_driver;

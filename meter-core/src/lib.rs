#![cfg_attr(not(any(feature = "std", test)), no_std)]

//! # Meter Core
//!
//! Pulse-frequency energy metering for HLW8012-style ICs.
//! Edge interrupts record raw timestamps; reads turn the latest pulse periods
//! into current, voltage, power, power factor and energy.

pub mod types;
pub mod error;
pub mod hal;
pub mod pulse;
pub mod registry;
pub mod convert;
pub mod calibration;
pub mod sampling;
pub mod sensor;

#[cfg(feature = "test-utils")]
pub mod test_utils;


pub use types::*;
pub use error::MeterError;
pub use hal::{EdgeTrigger, HalError, InterruptController, MonotonicClock};
pub use pulse::{PulseFrontend, PulseTimer};
pub use registry::{EdgeHandler, InterruptRegistry};
pub use calibration::{Calibration, CalibrationRatios};
pub use sampling::SamplingController;
pub use sensor::{read_cycle, PulseMeter, Reading, Sensor};

/// Meter library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration for a Sonoff POW style board
pub fn default_config() -> MeterConfig {
    MeterConfig {
        pulse_timeout_us: 2_000_000,
        calibration_window_us: 3_000_000,
        calibration_poll_us: 1_000,
        trigger: EdgeTrigger::Rising,
        wiring: Wiring::Multiplexed,
        attach: AttachPolicy::Immediate,
        zero_current_without_power: false,
        chip: ChipConstants::HLW8012,
    }
}

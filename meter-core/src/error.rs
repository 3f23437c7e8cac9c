//! Error type shared by all meter operations

use crate::hal::HalError;

/// Meter errors.
///
/// A silent pulse line is not an error: it reads as a zero magnitude.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeterError {
    /// Slot index outside the sensor's slot range
    OutOfRange,
    /// No pulses seen during the calibration window; previous ratio kept
    CalibrationFailed,
    /// Non-positive or non-finite ratio, resistor or timing value
    ConfigurationInvalid,
    /// GPIO cannot raise edge interrupts
    InvalidPin,
    /// Operation requires `begin()` first
    NotInitialized,
    /// Board-level failure
    Hal(HalError),
}

impl From<HalError> for MeterError {
    fn from(error: HalError) -> Self {
        match error {
            HalError::InvalidPin => MeterError::InvalidPin,
            other => MeterError::Hal(other),
        }
    }
}

#[cfg(feature = "std")]
impl core::fmt::Display for MeterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MeterError::OutOfRange => write!(f, "Slot index out of range"),
            MeterError::CalibrationFailed => write!(f, "No pulses observed during calibration"),
            MeterError::ConfigurationInvalid => write!(f, "Invalid configuration value"),
            MeterError::InvalidPin => write!(f, "GPIO is not interrupt capable"),
            MeterError::NotInitialized => write!(f, "Sensor not initialized"),
            MeterError::Hal(e) => write!(f, "Hardware error: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MeterError {}

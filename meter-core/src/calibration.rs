//! Calibration ratios and expected-value self-calibration

use crate::error::MeterError;
use crate::pulse::{EdgeSnapshot, PulseTimer};
use crate::types::{Channel, ChipConstants, ResistorConstants};

/// Multipliers turning a pulse period in seconds into a physical unit
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRatios {
    /// A·s
    pub current: f64,
    /// V·s
    pub voltage: f64,
    /// W·s
    pub power: f64,
}

impl CalibrationRatios {
    /// Nominal ratios from the datasheet transfer functions
    pub fn from_resistors(resistors: &ResistorConstants, chip: &ChipConstants) -> Self {
        let divider = resistors.voltage_ratio();
        Self {
            current: 512.0 * chip.v_ref / resistors.current / 24.0 / chip.f_osc,
            voltage: 512.0 * chip.v_ref * divider / 2.0 / chip.f_osc,
            power: 128.0 * chip.v_ref * chip.v_ref * divider / resistors.current / 48.0 / chip.f_osc,
        }
    }

    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Current => self.current,
            Channel::Voltage => self.voltage,
            Channel::Power => self.power,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut f64 {
        match channel {
            Channel::Current => &mut self.current,
            Channel::Voltage => &mut self.voltage,
            Channel::Power => &mut self.power,
        }
    }
}

fn validate(value: f64) -> Result<f64, MeterError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(MeterError::ConfigurationInvalid)
    }
}

/// Owner of the three ratios.
///
/// Ratios set explicitly survive `apply_defaults`; the rest follow the
/// resistor model.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    ratios: CalibrationRatios,
    explicit: [bool; 3],
}

impl Calibration {
    pub fn new(defaults: CalibrationRatios) -> Self {
        Self {
            ratios: defaults,
            explicit: [false; 3],
        }
    }

    pub fn ratios(&self) -> CalibrationRatios {
        self.ratios
    }

    pub fn ratio(&self, channel: Channel) -> f64 {
        self.ratios.get(channel)
    }

    /// Rejects non-positive or non-finite values, keeping the old ratio
    pub fn set_ratio(&mut self, channel: Channel, ratio: f64) -> Result<(), MeterError> {
        *self.ratios.get_mut(channel) = validate(ratio)?;
        self.explicit[channel.index()] = true;
        Ok(())
    }

    /// The ratio expressed as a divisor, `1 / ratio`
    pub fn divisor(&self, channel: Channel) -> f64 {
        1.0 / self.ratio(channel)
    }

    pub fn set_divisor(&mut self, channel: Channel, divisor: f64) -> Result<(), MeterError> {
        let divisor = validate(divisor)?;
        self.set_ratio(channel, 1.0 / divisor)
    }

    pub fn is_explicit(&self, channel: Channel) -> bool {
        self.explicit[channel.index()]
    }

    /// Fill every ratio that was not set explicitly
    pub fn apply_defaults(&mut self, defaults: &CalibrationRatios) {
        for channel in Channel::ALL {
            if !self.is_explicit(channel) {
                *self.ratios.get_mut(channel) = defaults.get(channel);
            }
        }
    }

    /// Back to the resistor model for all three
    pub fn reset(&mut self, defaults: &CalibrationRatios) {
        self.explicit = [false; 3];
        self.apply_defaults(defaults);
    }
}

/// Ratio that makes `period_s` read as `expected`
pub fn ratio_from_expected(expected: f64, period_s: f64) -> Result<f64, MeterError> {
    validate(expected)?;
    if !(period_s > 0.0) {
        return Err(MeterError::CalibrationFailed);
    }
    validate(expected * period_s)
}

/// Bounded sampling window for self-calibration.
///
/// Poll `observe` until it returns false, then read the average edge
/// interval over every edge seen after the first.
#[derive(Copy, Clone, Debug)]
pub struct CalibrationWindow {
    opened_at: u32,
    length_us: u32,
    edges_at_open: u32,
    first: Option<EdgeSnapshot>,
    last: Option<EdgeSnapshot>,
}

impl CalibrationWindow {
    pub fn open(timer: &PulseTimer, now: u32, length_us: u32) -> Self {
        Self {
            opened_at: now,
            length_us,
            edges_at_open: timer.edges(),
            first: None,
            last: None,
        }
    }

    /// Sample the timer; false once the window has elapsed
    pub fn observe(&mut self, timer: &PulseTimer, now: u32) -> bool {
        let snapshot = timer.snapshot();
        if snapshot.edges != self.edges_at_open {
            if self.first.is_none() {
                self.first = Some(snapshot);
            }
            self.last = Some(snapshot);
        }
        now.wrapping_sub(self.opened_at) < self.length_us
    }

    /// Average interval in microseconds, `None` without at least one full period
    pub fn average_interval(&self) -> Option<f64> {
        let (first, last) = (self.first?, self.last?);
        let intervals = last.edges.wrapping_sub(first.edges);
        if intervals == 0 {
            return None;
        }
        Some(last.last_edge.wrapping_sub(first.last_edge) as f64 / intervals as f64)
    }
}

//! Pulse period to physical unit conversion
//!
//! The metering IC outputs a pulse frequency proportional to the measured
//! quantity, so every magnitude is `ratio / period`.

use crate::hal::EdgeTrigger;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Full pulse period in seconds for an edge-to-edge interval
pub fn period_seconds(interval_us: u32, trigger: EdgeTrigger) -> f64 {
    interval_us as f64 * trigger.edges_per_cycle() as f64 / MICROS_PER_SECOND
}

/// `ratio / period`, zero when there is no period
pub fn from_period(ratio: f64, period_s: f64) -> f64 {
    if period_s > 0.0 {
        ratio / period_s
    } else {
        0.0
    }
}

pub fn apparent_power(current: f64, voltage: f64) -> f64 {
    current * voltage
}

/// `sqrt(S² - P²)`, clamped at zero when measurement noise puts P above S
pub fn reactive_power(active: f64, apparent: f64) -> f64 {
    let squared = apparent * apparent - active * active;
    if squared > 0.0 {
        libm::sqrt(squared)
    } else {
        0.0
    }
}

/// `P / S` within `[0, 1]`
pub fn power_factor(active: f64, apparent: f64) -> f64 {
    if apparent <= 0.0 || active <= 0.0 {
        0.0
    } else if active >= apparent {
        1.0
    } else {
        active / apparent
    }
}

/// Energy integrated from instantaneous active power.
///
/// Volatile: lost on restart. Elapsed time comes from the wrapping
/// microsecond clock, so calls must be less than one counter period apart.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EnergyAccumulator {
    joules: f64,
    last_us: Option<u32>,
}

impl EnergyAccumulator {
    pub const fn new() -> Self {
        Self {
            joules: 0.0,
            last_us: None,
        }
    }

    /// Add `power_w` over the time since the previous call; returns the total.
    /// The first call only starts the clock.
    pub fn integrate(&mut self, power_w: f64, now_us: u32) -> f64 {
        if let Some(last) = self.last_us {
            let elapsed = now_us.wrapping_sub(last) as f64 / MICROS_PER_SECOND;
            if power_w > 0.0 {
                self.joules += power_w * elapsed;
            }
        }
        self.last_us = Some(now_us);
        self.joules
    }

    /// Accumulated energy in joules
    pub fn joules(&self) -> f64 {
        self.joules
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

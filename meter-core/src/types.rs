//! Core data types for the pulse meter

use crate::error::MeterError;
use crate::hal::EdgeTrigger;

/// GPIOs a pulse line may be attached to, one registry slot each.
///
/// Not contiguous; the remaining lines are left to other board functions.
pub const INTERRUPT_GPIOS: [u8; SLOT_COUNT] = [0, 1, 2, 3, 4, 5, 12, 13, 14, 15];

/// Number of interrupt registry slots
pub const SLOT_COUNT: usize = 10;

/// An interrupt-capable GPIO, carrying its registry slot
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioId {
    number: u8,
    slot: u8,
}

impl GpioId {
    /// Validate a GPIO number; `None` if it cannot raise interrupts
    pub const fn new(number: u8) -> Option<Self> {
        let mut slot = 0;
        while slot < SLOT_COUNT {
            if INTERRUPT_GPIOS[slot] == number {
                return Some(Self { number, slot: slot as u8 });
            }
            slot += 1;
        }
        None
    }

    /// GPIO served by registry slot `slot`
    pub const fn from_slot(slot: usize) -> Option<Self> {
        if slot < SLOT_COUNT {
            Some(Self { number: INTERRUPT_GPIOS[slot], slot: slot as u8 })
        } else {
            None
        }
    }

    pub const fn number(&self) -> u8 {
        self.number
    }

    pub const fn slot(&self) -> usize {
        self.slot as usize
    }
}

impl TryFrom<u8> for GpioId {
    type Error = MeterError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        GpioId::new(number).ok_or(MeterError::InvalidPin)
    }
}

/// Calibrated quantity, each backed by its own pulse timer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// CF1 while SEL selects current
    Current,
    /// CF1 while SEL selects voltage, or the dedicated voltage output
    Voltage,
    /// CF, active power
    Power,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Current, Channel::Voltage, Channel::Power];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Quantity currently routed onto the shared CF1 line
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplingMode {
    Current = 0,
    Voltage = 1,
}

impl SamplingMode {
    pub const fn opposite(&self) -> SamplingMode {
        match self {
            SamplingMode::Current => SamplingMode::Voltage,
            SamplingMode::Voltage => SamplingMode::Current,
        }
    }

    pub const fn channel(&self) -> Channel {
        match self {
            SamplingMode::Current => Channel::Current,
            SamplingMode::Voltage => Channel::Voltage,
        }
    }

    /// Mode that routes `channel` onto CF1; `None` for the power line
    pub const fn for_channel(channel: Channel) -> Option<SamplingMode> {
        match channel {
            Channel::Current => Some(SamplingMode::Current),
            Channel::Voltage => Some(SamplingMode::Voltage),
            Channel::Power => None,
        }
    }

    pub(crate) const fn from_bits(bits: u8) -> Self {
        if bits == SamplingMode::Voltage as u8 {
            SamplingMode::Voltage
        } else {
            SamplingMode::Current
        }
    }
}

/// Physical magnitude reported by a sensor slot
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Magnitude {
    /// Undefined; reported for out-of-range slots
    None,
    Current,
    Voltage,
    ActivePower,
    ReactivePower,
    ApparentPower,
    /// Percentage, 0..=100
    PowerFactor,
    Energy,
}

impl Magnitude {
    pub const fn unit(&self) -> &'static str {
        match self {
            Magnitude::None => "",
            Magnitude::Current => "A",
            Magnitude::Voltage => "V",
            Magnitude::ActivePower => "W",
            Magnitude::ReactivePower => "var",
            Magnitude::ApparentPower => "VA",
            Magnitude::PowerFactor => "%",
            Magnitude::Energy => "J",
        }
    }
}

/// How the IC exposes current and voltage
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wiring {
    /// One CF1 line switched between current and voltage by SEL
    Multiplexed,
    /// Voltage has its own pulse output; nothing is ever toggled
    Independent { voltage_pin: GpioId },
}

impl Wiring {
    pub const fn is_multiplexed(&self) -> bool {
        matches!(self, Wiring::Multiplexed)
    }
}

/// When edge interrupts get attached
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachPolicy {
    /// In `begin()`
    Immediate,
    /// Deferred until the network link is up, dropped when it goes down
    OnLinkUp,
}

/// Physical pins wired to the metering IC
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinAssignment {
    /// SEL output
    pub select: u8,
    /// CF1: current (or voltage) pulse output
    pub current_pulse: GpioId,
    /// CF: active power pulse output
    pub power_pulse: GpioId,
    /// SEL level that routes current onto CF1
    pub select_high_means_current: bool,
}

impl PinAssignment {
    pub fn new(select: u8, current_pulse: u8, power_pulse: u8, select_high_means_current: bool) -> Result<Self, MeterError> {
        Ok(Self {
            select,
            current_pulse: GpioId::try_from(current_pulse)?,
            power_pulse: GpioId::try_from(power_pulse)?,
            select_high_means_current,
        })
    }
}

impl Default for PinAssignment {
    /// Sonoff POW: SEL on GPIO5, CF1 on GPIO13, CF on GPIO14
    fn default() -> Self {
        Self {
            select: 5,
            current_pulse: GpioId { number: 13, slot: 7 },
            power_pulse: GpioId { number: 14, slot: 8 },
            select_high_means_current: true,
        }
    }
}

/// Sense resistors in front of the IC, in ohms
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResistorConstants {
    /// Series shunt on the mains line
    pub current: f64,
    /// Upper leg of the voltage divider feeding V2P
    pub voltage_upstream: f64,
    /// Lower leg of the voltage divider
    pub voltage_downstream: f64,
}

impl ResistorConstants {
    /// Sonoff POW: 1 mΩ manganin shunt, 5 × 470 kΩ over 1 kΩ divider
    pub const SONOFF_POW: ResistorConstants = ResistorConstants {
        current: 0.001,
        voltage_upstream: 5.0 * 470_000.0,
        voltage_downstream: 1_000.0,
    };

    pub fn new(current: f64, voltage_upstream: f64, voltage_downstream: f64) -> Result<Self, MeterError> {
        let valid = |r: f64| r.is_finite() && r > 0.0;
        if !valid(current) || !valid(voltage_upstream) || !valid(voltage_downstream) {
            return Err(MeterError::ConfigurationInvalid);
        }
        Ok(Self {
            current,
            voltage_upstream,
            voltage_downstream,
        })
    }

    /// Divider gain from mains to the V2P pin
    pub fn voltage_ratio(&self) -> f64 {
        (self.voltage_upstream + self.voltage_downstream) / self.voltage_downstream
    }
}

/// Datasheet constants of the metering IC
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipConstants {
    pub name: &'static str,
    /// Internal reference voltage, volts
    pub v_ref: f64,
    /// Oscillator frequency, hertz
    pub f_osc: f64,
}

impl ChipConstants {
    pub const HLW8012: ChipConstants = ChipConstants {
        name: "HLW8012",
        v_ref: 2.43,
        f_osc: 3_579_000.0,
    };
}

/// Meter configuration parameters
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeterConfig {
    /// Silence after which a line reports no data
    pub pulse_timeout_us: u32,
    /// Length of a self-calibration sampling window
    pub calibration_window_us: u32,
    /// Poll interval inside the calibration window
    pub calibration_poll_us: u32,
    pub trigger: EdgeTrigger,
    pub wiring: Wiring,
    pub attach: AttachPolicy,
    /// Report zero current while the power line is silent
    pub zero_current_without_power: bool,
    pub chip: ChipConstants,
}

impl Default for MeterConfig {
    fn default() -> Self {
        crate::default_config()
    }
}

impl MeterConfig {
    /// Create a new configuration with validation
    pub fn new(
        pulse_timeout_us: u32,
        calibration_window_us: u32,
        trigger: EdgeTrigger,
        wiring: Wiring,
        attach: AttachPolicy,
    ) -> Result<Self, MeterError> {
        if pulse_timeout_us == 0 || calibration_window_us == 0 {
            return Err(MeterError::ConfigurationInvalid);
        }

        Ok(Self {
            pulse_timeout_us,
            calibration_window_us,
            trigger,
            wiring,
            attach,
            ..crate::default_config()
        })
    }
}

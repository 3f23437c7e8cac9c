//! Sensor facade consumed by the polling framework
//!
//! The framework calls `begin()` once, then on every tick reads each slot
//! with `magnitude_type()`/`value()` and finally `post()`. Slot reads report
//! failure through `last_error()` rather than a return value so a slot can
//! always yield a sentinel.

use core::fmt::Write;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use heapless::{String, Vec};

use crate::calibration::{self, Calibration, CalibrationRatios, CalibrationWindow};
use crate::convert::{self, EnergyAccumulator};
use crate::error::MeterError;
use crate::hal::{InterruptController, MonotonicClock};
use crate::pulse::PulseFrontend;
use crate::registry::{EdgeHandler, InterruptRegistry};
use crate::sampling::SamplingController;
use crate::types::{
    AttachPolicy, Channel, GpioId, Magnitude, MeterConfig, PinAssignment, ResistorConstants, SamplingMode, Wiring,
};

/// Upper bound on slots a sensor may expose
pub const MAX_SLOTS: usize = 8;

const SLOTS: [Magnitude; 7] = [
    Magnitude::Current,
    Magnitude::Voltage,
    Magnitude::ActivePower,
    Magnitude::ReactivePower,
    Magnitude::ApparentPower,
    Magnitude::PowerFactor,
    Magnitude::Energy,
];

/// Uniform per-sensor contract of the polling framework
pub trait Sensor {
    /// Idempotent setup
    fn begin(&mut self) -> Result<(), MeterError>;

    fn ready(&self) -> bool;

    /// Number of slots
    fn count(&self) -> u8;

    fn description(&self) -> String<32>;

    /// Per-slot description
    fn slot(&self, _index: u8) -> String<32> {
        self.description()
    }

    fn address(&self, index: u8) -> String<16>;

    fn magnitude_type(&mut self, index: u8) -> Magnitude;

    fn value(&mut self, index: u8) -> f64;

    /// Outcome of the latest `magnitude_type`/`value` call
    fn last_error(&self) -> Option<MeterError>;

    /// Whether `post()` must be called after each read cycle
    fn wants_post(&self) -> bool {
        false
    }

    fn post(&mut self) -> Result<(), MeterError> {
        Ok(())
    }
}

/// One slot's value as produced by a read cycle
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub magnitude: Magnitude,
    pub value: f64,
}

/// Read every slot into `out`, then `post()` if the sensor asks for it
pub fn read_cycle<S>(sensor: &mut S, out: &mut Vec<Reading, MAX_SLOTS>) -> Result<(), MeterError>
where
    S: Sensor + ?Sized,
{
    out.clear();
    for index in 0..sensor.count() {
        let magnitude = sensor.magnitude_type(index);
        let value = sensor.value(index);
        if let Some(error) = sensor.last_error() {
            return Err(error);
        }
        out.push(Reading { magnitude, value }).map_err(|_| MeterError::OutOfRange)?;
    }
    if sensor.wants_post() {
        sensor.post()?;
    }
    Ok(())
}

/// Pulse-output energy meter (HLW8012 and compatibles).
///
/// The interrupt-visible state lives in a `static` [`PulseFrontend`]; this
/// object owns everything that runs in main context: pin configuration,
/// calibration, SEL switching and energy integration.
pub struct PulseMeter<C, I, P>
where
    C: MonotonicClock + Sync + 'static,
    I: InterruptController,
    P: OutputPin,
{
    frontend: &'static PulseFrontend<C>,
    registry: &'static InterruptRegistry,
    interrupts: I,
    select: P,
    config: MeterConfig,
    pins: PinAssignment,
    resistors: ResistorConstants,
    calibration: Calibration,
    sampling: SamplingController,
    energy: EnergyAccumulator,
    attached: Vec<GpioId, 3>,
    link_up: bool,
    ready: bool,
    dirty: bool,
    error: Option<MeterError>,
}

impl<C, I, P> PulseMeter<C, I, P>
where
    C: MonotonicClock + Sync + 'static,
    I: InterruptController,
    P: OutputPin,
{
    /// Meter on the Sonoff POW pins and resistors; change them before `begin()`
    pub fn new(
        frontend: &'static PulseFrontend<C>,
        registry: &'static InterruptRegistry,
        interrupts: I,
        select: P,
        config: MeterConfig,
    ) -> Self {
        let pins = PinAssignment::default();
        let resistors = ResistorConstants::SONOFF_POW;
        Self {
            frontend,
            registry,
            interrupts,
            select,
            config,
            pins,
            resistors,
            calibration: Calibration::new(CalibrationRatios::from_resistors(&resistors, &config.chip)),
            sampling: SamplingController::new(config.wiring, pins.select_high_means_current),
            energy: EnergyAccumulator::new(),
            attached: Vec::new(),
            link_up: false,
            ready: false,
            dirty: false,
            error: None,
        }
    }

    pub fn with_pins(mut self, pins: PinAssignment) -> Self {
        self.pins = pins;
        self.dirty = true;
        self
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn pins(&self) -> &PinAssignment {
        &self.pins
    }

    pub fn resistors(&self) -> &ResistorConstants {
        &self.resistors
    }

    /// Pin configuration changed since the last `begin()`
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_multiplexed(&self) -> bool {
        !self.sampling.is_inert()
    }

    pub fn mode(&self) -> SamplingMode {
        self.sampling.mode()
    }

    /// Lines currently bound to this meter in the registry
    pub fn attached(&self) -> &[GpioId] {
        &self.attached
    }

    // ---- Pin configuration ----

    /// Replace the SEL output. Takes effect on the next `begin()`.
    pub fn set_select_pin(&mut self, number: u8, select: P) {
        self.select = select;
        self.pins.select = number;
        self.dirty = true;
    }

    /// CF1 line. Takes effect on the next `begin()`.
    pub fn set_current_pulse_pin(&mut self, number: u8) -> Result<(), MeterError> {
        let gpio = GpioId::try_from(number)?;
        if self.pins.current_pulse != gpio {
            self.pins.current_pulse = gpio;
            self.dirty = true;
        }
        Ok(())
    }

    /// CF line. Takes effect on the next `begin()`.
    pub fn set_power_pulse_pin(&mut self, number: u8) -> Result<(), MeterError> {
        let gpio = GpioId::try_from(number)?;
        if self.pins.power_pulse != gpio {
            self.pins.power_pulse = gpio;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn set_select_high_means_current(&mut self, high_means_current: bool) {
        if self.pins.select_high_means_current != high_means_current {
            self.pins.select_high_means_current = high_means_current;
            self.dirty = true;
        }
    }

    /// Resistor constants are fixed once the meter has started
    pub fn set_resistors(&mut self, resistors: ResistorConstants) -> Result<(), MeterError> {
        if self.ready {
            return Err(MeterError::ConfigurationInvalid);
        }
        self.resistors = ResistorConstants::new(
            resistors.current,
            resistors.voltage_upstream,
            resistors.voltage_downstream,
        )?;
        let defaults = self.default_ratios();
        self.calibration.apply_defaults(&defaults);
        Ok(())
    }

    // ---- Lifecycle ----

    /// Resistor-model ratios for the current constants
    pub fn default_ratios(&self) -> CalibrationRatios {
        CalibrationRatios::from_resistors(&self.resistors, &self.config.chip)
    }

    fn owner(&self) -> &'static dyn EdgeHandler {
        self.frontend
    }

    fn lines(&self) -> Vec<GpioId, 3> {
        let mut lines: Vec<GpioId, 3> = Vec::new();
        let voltage = match self.config.wiring {
            Wiring::Independent { voltage_pin } => Some(voltage_pin),
            Wiring::Multiplexed => None,
        };
        for gpio in [Some(self.pins.power_pulse), Some(self.pins.current_pulse), voltage]
            .into_iter()
            .flatten()
        {
            if !lines.contains(&gpio) {
                // At most three distinct lines
                let _ = lines.push(gpio);
            }
        }
        lines
    }

    fn should_attach(&self) -> bool {
        match self.config.attach {
            AttachPolicy::Immediate => true,
            AttachPolicy::OnLinkUp => self.link_up,
        }
    }

    fn attach_all(&mut self) -> Result<(), MeterError> {
        let owner = self.owner();
        for gpio in self.lines() {
            if self.attached.contains(&gpio) {
                continue;
            }
            self.registry.attach(gpio, owner, self.config.trigger, &mut self.interrupts)?;
            let _ = self.attached.push(gpio);
        }
        Ok(())
    }

    fn detach_all(&mut self) -> Result<(), MeterError> {
        let owner = self.owner();
        while let Some(&gpio) = self.attached.last() {
            self.registry.detach(gpio, owner, &mut self.interrupts)?;
            self.attached.pop();
        }
        Ok(())
    }

    // ---- Readings ----

    /// Whether edges for `channel` are arriving right now
    pub fn is_routed(&self, channel: Channel) -> bool {
        match channel {
            Channel::Power => true,
            _ => self.sampling.is_inert() || self.frontend.routed().channel() == channel,
        }
    }

    /// Latest full pulse period in seconds.
    ///
    /// A routed channel that has gone quiet past the timeout has none; an
    /// unrouted one keeps the period measured while it was routed.
    pub fn period(&self, channel: Channel) -> Option<f64> {
        let timer = self.frontend.timer(channel);
        let interval = if self.is_routed(channel) {
            timer.interval(self.frontend.now(), self.config.pulse_timeout_us)
        } else {
            timer.held()
        };
        interval.map(|us| convert::period_seconds(us, self.config.trigger))
    }

    fn magnitude(&self, channel: Channel) -> f64 {
        match self.period(channel) {
            Some(period) => convert::from_period(self.calibration.ratio(channel), period),
            None => 0.0,
        }
    }

    /// Amperes
    pub fn current(&self) -> f64 {
        // The power line reacts to switch-off first
        if self.config.zero_current_without_power && self.active_power() == 0.0 {
            return 0.0;
        }
        self.magnitude(Channel::Current)
    }

    /// Volts
    pub fn voltage(&self) -> f64 {
        self.magnitude(Channel::Voltage)
    }

    /// Watts
    pub fn active_power(&self) -> f64 {
        self.magnitude(Channel::Power)
    }

    /// Volt-amperes
    pub fn apparent_power(&self) -> f64 {
        convert::apparent_power(self.current(), self.voltage())
    }

    /// Volt-amperes reactive
    pub fn reactive_power(&self) -> f64 {
        convert::reactive_power(self.active_power(), self.apparent_power())
    }

    /// 0.0 ..= 1.0
    pub fn power_factor(&self) -> f64 {
        convert::power_factor(self.active_power(), self.apparent_power())
    }

    /// Joules since start, integrated up to now
    pub fn energy(&mut self) -> f64 {
        let power = self.active_power();
        self.energy.integrate(power, self.frontend.now())
    }

    pub fn reset_energy(&mut self) {
        self.energy.reset();
    }

    // ---- Calibration ----

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn ratio(&self, channel: Channel) -> f64 {
        self.calibration.ratio(channel)
    }

    pub fn set_ratio(&mut self, channel: Channel, ratio: f64) -> Result<(), MeterError> {
        self.calibration.set_ratio(channel, ratio)
    }

    pub fn divisor(&self, channel: Channel) -> f64 {
        self.calibration.divisor(channel)
    }

    pub fn set_divisor(&mut self, channel: Channel, divisor: f64) -> Result<(), MeterError> {
        self.calibration.set_divisor(channel, divisor)
    }

    /// Back to the resistor-model ratios
    pub fn reset_ratios(&mut self) {
        let defaults = self.default_ratios();
        self.calibration.reset(&defaults);
    }

    fn open_window(&mut self, channel: Channel, expected: f64) -> Result<CalibrationWindow, MeterError> {
        if !self.ready {
            return Err(MeterError::NotInitialized);
        }
        if !(expected.is_finite() && expected > 0.0) {
            return Err(MeterError::ConfigurationInvalid);
        }
        if let Some(mode) = SamplingMode::for_channel(channel) {
            self.sampling.select(mode, &mut self.select, self.frontend)?;
        }

        #[cfg(feature = "defmt")]
        defmt::info!("Calibrating {} against {}", channel, expected);

        let frontend = self.frontend;
        Ok(CalibrationWindow::open(
            frontend.timer(channel),
            frontend.now(),
            self.config.calibration_window_us,
        ))
    }

    fn close_window(&mut self, channel: Channel, expected: f64, window: &CalibrationWindow) -> Result<f64, MeterError> {
        let Some(interval_us) = window.average_interval() else {
            #[cfg(feature = "defmt")]
            defmt::warn!("Calibration of {} failed: no pulses", channel);
            return Err(MeterError::CalibrationFailed);
        };

        let period = interval_us * self.config.trigger.edges_per_cycle() as f64 / 1_000_000.0;
        let ratio = calibration::ratio_from_expected(expected, period)?;
        self.calibration.set_ratio(channel, ratio)?;

        #[cfg(feature = "defmt")]
        defmt::info!("Calibrated {}: ratio {}", channel, ratio);

        Ok(ratio)
    }

    /// Back-solve `channel`'s ratio from a known reference.
    ///
    /// Busy-waits for the configured window. On `CalibrationFailed` the
    /// previous ratio is kept.
    pub fn calibrate_from_expected<D>(&mut self, channel: Channel, expected: f64, delay: &mut D) -> Result<f64, MeterError>
    where
        D: DelayNs,
    {
        let mut window = self.open_window(channel, expected)?;
        let frontend = self.frontend;
        while window.observe(frontend.timer(channel), frontend.now()) {
            delay.delay_us(self.config.calibration_poll_us);
        }
        self.close_window(channel, expected, &window)
    }

    /// [`calibrate_from_expected`](Self::calibrate_from_expected), yielding between polls
    pub async fn calibrate_from_expected_async<D>(
        &mut self,
        channel: Channel,
        expected: f64,
        delay: &mut D,
    ) -> Result<f64, MeterError>
    where
        D: embedded_hal_async::delay::DelayNs,
    {
        let mut window = self.open_window(channel, expected)?;
        let frontend = self.frontend;
        while window.observe(frontend.timer(channel), frontend.now()) {
            delay.delay_us(self.config.calibration_poll_us).await;
        }
        self.close_window(channel, expected, &window)
    }

    // ---- Connectivity gating ----

    pub fn link_established(&mut self) -> Result<(), MeterError> {
        self.link_up = true;
        if self.ready && self.config.attach == AttachPolicy::OnLinkUp {
            #[cfg(feature = "defmt")]
            defmt::info!("Link up, enabling pulse sampling");
            self.attach_all()?;
        }
        Ok(())
    }

    pub fn link_lost(&mut self) -> Result<(), MeterError> {
        self.link_up = false;
        if self.config.attach == AttachPolicy::OnLinkUp {
            #[cfg(feature = "defmt")]
            defmt::info!("Link down, disabling pulse sampling");
            self.detach_all()?;
        }
        Ok(())
    }
}

impl<C, I, P> Sensor for PulseMeter<C, I, P>
where
    C: MonotonicClock + Sync + 'static,
    I: InterruptController,
    P: OutputPin,
{
    fn begin(&mut self) -> Result<(), MeterError> {
        if self.ready && !self.dirty {
            return Ok(());
        }

        self.detach_all()?;
        self.ready = false;

        self.frontend
            .configure(&self.pins, self.config.wiring, self.config.pulse_timeout_us);
        let defaults = self.default_ratios();
        self.calibration.apply_defaults(&defaults);

        self.sampling = SamplingController::new(self.config.wiring, self.pins.select_high_means_current);
        self.sampling
            .select(SamplingMode::Current, &mut self.select, self.frontend)?;

        if self.should_attach() {
            self.attach_all()?;
        }

        self.ready = true;
        self.dirty = false;

        #[cfg(feature = "defmt")]
        defmt::info!(
            "{} ready: SEL GPIO{} CF GPIO{} CF1 GPIO{}",
            self.config.chip.name,
            self.pins.select,
            self.pins.power_pulse.number(),
            self.pins.current_pulse.number()
        );

        Ok(())
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn count(&self) -> u8 {
        SLOTS.len() as u8
    }

    fn description(&self) -> String<32> {
        let mut out = String::new();
        let _ = write!(
            out,
            "{} @ GPIO({},{},{})",
            self.config.chip.name,
            self.pins.select,
            self.pins.power_pulse.number(),
            self.pins.current_pulse.number()
        );
        out
    }

    fn address(&self, _index: u8) -> String<16> {
        let mut out = String::new();
        let _ = write!(
            out,
            "{}:{}:{}",
            self.pins.select,
            self.pins.power_pulse.number(),
            self.pins.current_pulse.number()
        );
        out
    }

    fn magnitude_type(&mut self, index: u8) -> Magnitude {
        match SLOTS.get(index as usize) {
            Some(&magnitude) => {
                self.error = None;
                magnitude
            }
            None => {
                self.error = Some(MeterError::OutOfRange);
                Magnitude::None
            }
        }
    }

    fn value(&mut self, index: u8) -> f64 {
        self.error = None;
        match index {
            0 => self.current(),
            1 => self.voltage(),
            2 => self.active_power(),
            3 => self.reactive_power(),
            4 => self.apparent_power(),
            5 => 100.0 * self.power_factor(),
            6 => self.energy(),
            _ => {
                self.error = Some(MeterError::OutOfRange);
                0.0
            }
        }
    }

    fn last_error(&self) -> Option<MeterError> {
        self.error
    }

    fn wants_post(&self) -> bool {
        self.is_multiplexed()
    }

    /// Flip SEL to the other quantity for the next cycle
    fn post(&mut self) -> Result<(), MeterError> {
        if !self.is_multiplexed() {
            return Ok(());
        }
        if !self.ready {
            return Err(MeterError::NotInitialized);
        }
        self.sampling.toggle(&mut self.select, self.frontend)?;
        Ok(())
    }
}

impl<C, I, P> Drop for PulseMeter<C, I, P>
where
    C: MonotonicClock + Sync + 'static,
    I: InterruptController,
    P: OutputPin,
{
    fn drop(&mut self) {
        // Nothing may dispatch into a meter that no longer exists
        let _ = self.detach_all();
    }
}

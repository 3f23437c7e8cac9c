//! Sampling-mode state machine for the shared CF1 line

use embedded_hal::digital::{OutputPin, PinState};

use crate::hal::{HalError, MonotonicClock};
use crate::pulse::PulseFrontend;
use crate::types::{SamplingMode, Wiring};

/// Drives SEL and keeps the edge routing in step with it.
///
/// Inert when the IC has an independent voltage output: both channels are
/// live all the time and nothing is ever switched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamplingController {
    mode: SamplingMode,
    select_high_means_current: bool,
    multiplexed: bool,
}

impl SamplingController {
    pub const fn new(wiring: Wiring, select_high_means_current: bool) -> Self {
        Self {
            mode: SamplingMode::Current,
            select_high_means_current,
            multiplexed: wiring.is_multiplexed(),
        }
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    pub fn is_inert(&self) -> bool {
        !self.multiplexed
    }

    /// SEL level that routes `mode` onto CF1
    pub fn level_for(&self, mode: SamplingMode) -> PinState {
        let current = mode == SamplingMode::Current;
        PinState::from(current == self.select_high_means_current)
    }

    /// Switch the front-end to `mode`.
    ///
    /// Pin, timer re-arm and routing change together inside one critical
    /// section, so no edge is credited to the wrong channel.
    pub fn select<P, C>(&mut self, mode: SamplingMode, select: &mut P, frontend: &PulseFrontend<C>) -> Result<(), HalError>
    where
        P: OutputPin,
        C: MonotonicClock,
    {
        if self.is_inert() {
            return Ok(());
        }

        let level = self.level_for(mode);
        critical_section::with(|_| {
            select.set_state(level).map_err(|_| HalError::Gpio)?;
            frontend.timer(mode.channel()).rearm(frontend.now());
            frontend.route(mode);
            Ok::<(), HalError>(())
        })?;
        self.mode = mode;

        #[cfg(feature = "defmt")]
        defmt::debug!("Sampling {}", mode);

        Ok(())
    }

    /// Flip to the other quantity; no-op when inert
    pub fn toggle<P, C>(&mut self, select: &mut P, frontend: &PulseFrontend<C>) -> Result<SamplingMode, HalError>
    where
        P: OutputPin,
        C: MonotonicClock,
    {
        if !self.is_inert() {
            self.select(self.mode.opposite(), select, frontend)?;
        }
        Ok(self.mode)
    }
}

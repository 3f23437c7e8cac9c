//! Host-side test rig for the pulse meter
//!
//! Each test declares its own registry with `interrupt_registry!` (the
//! trampolines are bound to a named static) and builds the rest from a
//! [`Rig`].

use meter_core::hal::mock::{MockClock, MockInterrupts, MockSelectPin};
use meter_core::test_utils::PulseSimulator;
use meter_core::{InterruptRegistry, MeterConfig, PulseFrontend, PulseMeter};

pub type TestClock = &'static MockClock;
pub type TestFrontend = PulseFrontend<TestClock>;
pub type TestMeter = PulseMeter<TestClock, MockInterrupts, MockSelectPin>;

/// Clock, frontend and board mocks for one simulated meter
pub struct Rig {
    pub clock: TestClock,
    pub frontend: &'static TestFrontend,
    pub irq: MockInterrupts,
    pub sel: MockSelectPin,
}

impl Rig {
    pub fn new() -> Self {
        Self::on(MockInterrupts::new())
    }

    /// Rig sharing an existing interrupt controller
    pub fn on(irq: MockInterrupts) -> Self {
        let clock: TestClock = Box::leak(Box::new(MockClock::new()));
        let frontend = Box::leak(Box::new(PulseFrontend::new(clock)));
        Self {
            clock,
            frontend,
            irq,
            sel: MockSelectPin::new(),
        }
    }

    pub fn meter(&self, registry: &'static InterruptRegistry, config: MeterConfig) -> TestMeter {
        PulseMeter::new(self.frontend, registry, self.irq.clone(), self.sel.clone(), config)
    }

    pub fn simulator(&self) -> PulseSimulator {
        PulseSimulator::new(self.clock, self.irq.clone())
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod calibration_tests;
#[cfg(test)]
mod sampling_tests;

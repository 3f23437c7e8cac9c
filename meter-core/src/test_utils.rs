//! Test utilities for meter core functionality

pub mod pulse_simulator {
    //! Pulse train simulation on top of the mock clock and interrupt lines

    use crate::hal::mock::{MockClock, MockInterrupts};
    use crate::hal::MonotonicClock;
    use crate::types::GpioId;
    use std::vec::Vec;

    /// Square wave on one line
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PulseTrain {
        pub gpio: GpioId,
        pub period_us: u32,
        /// Simulated time of the next edge
        next_us: u64,
    }

    /// Deterministic time source that fires scheduled edges as time advances.
    ///
    /// Edges only reach a handler if the line is attached on the mock
    /// controller, exactly as on hardware. Implements both delay traits so
    /// the blocking and async calibration paths run against it unchanged.
    pub struct PulseSimulator {
        clock: &'static MockClock,
        interrupts: MockInterrupts,
        trains: Vec<PulseTrain>,
        /// Simulated microseconds since creation, never wraps
        elapsed_us: u64,
        origin: u32,
        pending_ns: u32,
        edges_fired: u32,
    }

    impl PulseSimulator {
        pub fn new(clock: &'static MockClock, interrupts: MockInterrupts) -> Self {
            Self {
                origin: clock.now_micros(),
                clock,
                interrupts,
                trains: Vec::new(),
                elapsed_us: 0,
                pending_ns: 0,
                edges_fired: 0,
            }
        }

        /// Simulated time since creation
        pub fn elapsed_us(&self) -> u64 {
            self.elapsed_us
        }

        /// Edges delivered to an attached line
        pub fn edges_fired(&self) -> u32 {
            self.edges_fired
        }

        /// Start (or retune) a train on `gpio`; first edge one period from now
        pub fn start_train(&mut self, gpio: GpioId, period_us: u32) {
            let period_us = period_us.max(1);
            let next_us = self.elapsed_us + period_us as u64;
            match self.trains.iter_mut().find(|train| train.gpio == gpio) {
                Some(train) => {
                    train.period_us = period_us;
                    train.next_us = next_us;
                }
                None => self.trains.push(PulseTrain { gpio, period_us, next_us }),
            }
        }

        pub fn stop_train(&mut self, gpio: GpioId) {
            self.trains.retain(|train| train.gpio != gpio);
        }

        /// Move time forward, firing every scheduled edge in order
        pub fn advance_us(&mut self, micros: u64) {
            let target = self.elapsed_us + micros;

            loop {
                let due = self
                    .trains
                    .iter_mut()
                    .filter(|train| train.next_us <= target)
                    .min_by_key(|train| train.next_us);
                let Some(train) = due else {
                    break;
                };

                let at = train.next_us;
                let gpio = train.gpio;
                train.next_us += train.period_us as u64;

                self.elapsed_us = at;
                self.clock.set(self.origin.wrapping_add(at as u32));
                if self.interrupts.fire(gpio) {
                    self.edges_fired += 1;
                }
            }

            self.elapsed_us = target;
            self.clock.set(self.origin.wrapping_add(target as u32));
        }

        fn sleep_ns(&mut self, ns: u32) {
            let total = self.pending_ns as u64 + ns as u64;
            self.pending_ns = (total % 1_000) as u32;
            self.advance_us(total / 1_000);
        }
    }

    impl embedded_hal::delay::DelayNs for PulseSimulator {
        fn delay_ns(&mut self, ns: u32) {
            self.sleep_ns(ns);
        }
    }

    impl embedded_hal_async::delay::DelayNs for PulseSimulator {
        async fn delay_ns(&mut self, ns: u32) {
            self.sleep_ns(ns);
        }
    }
}

pub use pulse_simulator::{PulseSimulator, PulseTrain};

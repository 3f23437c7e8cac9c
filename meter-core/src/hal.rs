//! Hardware Abstraction Layer for the pulse meter

use crate::types::GpioId;

/// Error types for HAL operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// GPIO operation failed
    Gpio,
    /// Interrupt configuration failed
    Interrupt,
    /// GPIO cannot raise edge interrupts on this board
    InvalidPin,
}

#[cfg(feature = "std")]
impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HalError::Gpio => write!(f, "GPIO operation failed"),
            HalError::Interrupt => write!(f, "Interrupt configuration failed"),
            HalError::InvalidPin => write!(f, "GPIO is not interrupt capable"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Which pulse edges raise an interrupt
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EdgeTrigger {
    Rising,
    Falling,
    /// Both edges; two interrupts per pulse period
    Both,
}

impl EdgeTrigger {
    /// Number of recorded edges per full pulse period
    pub const fn edges_per_cycle(&self) -> u32 {
        match self {
            EdgeTrigger::Rising | EdgeTrigger::Falling => 1,
            EdgeTrigger::Both => 2,
        }
    }
}

/// Free-running microsecond counter.
///
/// The counter wraps at `u32::MAX` (about 71.6 minutes); every elapsed-time
/// computation in this crate uses `wrapping_sub`, so a single rollover between
/// two readings is harmless.
pub trait MonotonicClock {
    fn now_micros(&self) -> u32;
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for &C {
    fn now_micros(&self) -> u32 {
        (**self).now_micros()
    }
}

/// Board interrupt controller: binds one handler per physical line
pub trait InterruptController {
    /// Install `handler` on `gpio` and enable the line
    fn attach(&mut self, gpio: GpioId, handler: fn(), trigger: EdgeTrigger) -> Result<(), HalError>;

    /// Disable the line and remove its handler.
    ///
    /// Must be effective before returning: no call into the old handler may
    /// happen afterwards.
    fn detach(&mut self, gpio: GpioId) -> Result<(), HalError>;
}

impl<T: InterruptController + ?Sized> InterruptController for &mut T {
    fn attach(&mut self, gpio: GpioId, handler: fn(), trigger: EdgeTrigger) -> Result<(), HalError> {
        (**self).attach(gpio, handler, trigger)
    }

    fn detach(&mut self, gpio: GpioId) -> Result<(), HalError> {
        (**self).detach(gpio)
    }
}

/// Clock backed by the embassy time driver
#[cfg(feature = "embassy-time")]
#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyClock;

#[cfg(feature = "embassy-time")]
impl MonotonicClock for EmbassyClock {
    fn now_micros(&self) -> u32 {
        // Truncation is the wraparound
        embassy_time::Instant::now().as_micros() as u32
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Mock implementations for testing

    use super::*;
    use crate::types::SLOT_COUNT;
    use core::cell::RefCell;
    use core::convert::Infallible;
    use core::sync::atomic::{AtomicU32, Ordering};
    use embedded_hal::digital::{ErrorType, OutputPin};
    use std::rc::Rc;
    use std::vec::Vec;

    /// Settable microsecond clock
    #[derive(Debug, Default)]
    pub struct MockClock {
        now: AtomicU32,
    }

    impl MockClock {
        pub const fn new() -> Self {
            Self::at(0)
        }

        pub const fn at(micros: u32) -> Self {
            Self { now: AtomicU32::new(micros) }
        }

        pub fn set(&self, micros: u32) {
            self.now.store(micros, Ordering::Relaxed);
        }

        /// Advance with wraparound, like the hardware counter
        pub fn advance(&self, micros: u32) {
            let now = self.now.load(Ordering::Relaxed);
            self.now.store(now.wrapping_add(micros), Ordering::Relaxed);
        }
    }

    impl MonotonicClock for MockClock {
        fn now_micros(&self) -> u32 {
            self.now.load(Ordering::Relaxed)
        }
    }

    #[derive(Default)]
    struct InterruptLines {
        handlers: [Option<(fn(), EdgeTrigger)>; SLOT_COUNT],
        attaches: u32,
        detaches: u32,
    }

    /// Interrupt controller that records installed trampolines.
    ///
    /// Clones share the same line table, so several meters can sit on one
    /// controller the way they do on real hardware.
    #[derive(Clone, Default)]
    pub struct MockInterrupts {
        lines: Rc<RefCell<InterruptLines>>,
    }

    impl MockInterrupts {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_attached(&self, gpio: GpioId) -> bool {
            self.lines.borrow().handlers[gpio.slot()].is_some()
        }

        pub fn trigger(&self, gpio: GpioId) -> Option<EdgeTrigger> {
            self.lines.borrow().handlers[gpio.slot()].map(|(_, trigger)| trigger)
        }

        pub fn attach_count(&self) -> u32 {
            self.lines.borrow().attaches
        }

        pub fn detach_count(&self) -> u32 {
            self.lines.borrow().detaches
        }

        /// Simulate a hardware edge on `gpio`. Returns false if the line is disabled.
        pub fn fire(&self, gpio: GpioId) -> bool {
            let handler = self.lines.borrow().handlers[gpio.slot()].map(|(handler, _)| handler);
            match handler {
                Some(handler) => {
                    handler();
                    true
                }
                None => false,
            }
        }
    }

    impl InterruptController for MockInterrupts {
        fn attach(&mut self, gpio: GpioId, handler: fn(), trigger: EdgeTrigger) -> Result<(), HalError> {
            let mut lines = self.lines.borrow_mut();
            lines.handlers[gpio.slot()] = Some((handler, trigger));
            lines.attaches += 1;
            Ok(())
        }

        fn detach(&mut self, gpio: GpioId) -> Result<(), HalError> {
            let mut lines = self.lines.borrow_mut();
            if lines.handlers[gpio.slot()].take().is_some() {
                lines.detaches += 1;
            }
            Ok(())
        }
    }

    /// Select line that remembers every level it was driven to
    #[derive(Clone, Default)]
    pub struct MockSelectPin {
        levels: Rc<RefCell<Vec<bool>>>,
    }

    impl MockSelectPin {
        pub fn new() -> Self {
            Self::default()
        }

        /// Last driven level, `None` if never driven
        pub fn level(&self) -> Option<bool> {
            self.levels.borrow().last().copied()
        }

        pub fn history(&self) -> Vec<bool> {
            self.levels.borrow().clone()
        }
    }

    impl ErrorType for MockSelectPin {
        type Error = Infallible;
    }

    impl OutputPin for MockSelectPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.levels.borrow_mut().push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.levels.borrow_mut().push(true);
            Ok(())
        }
    }
}

//! CH32V203 Hardware Implementation
//!
//! 64KB Flash / 20KB RAM. EXTI line `n` serves GPIO `n` of the selected
//! port, so a `GpioId` number is also its EXTI line.

use core::cell::Cell;
use core::convert::Infallible;
use critical_section::Mutex;
use embedded_hal::digital::{ErrorType, OutputPin};
use portable_atomic::{AtomicBool, AtomicU16, Ordering};

use meter_core::hal::EmbassyClock;
use meter_core::{EdgeTrigger, GpioId, HalError, InterruptController};

/// Microsecond clock for the meter, backed by the embassy time driver
pub type MeterClock = EmbassyClock;

/// EXTI lines on the CH32V203
pub const EXTI_LINES: usize = 16;

type ExtiHandler = Mutex<Cell<Option<fn()>>>;

const NO_HANDLER: ExtiHandler = Mutex::new(Cell::new(None));

/// Handler per EXTI line, installed by `ExtiInterrupts::attach`
static EXTI_HANDLERS: [ExtiHandler; EXTI_LINES] = [NO_HANDLER; EXTI_LINES];

/// Shadow of INTENR: lines allowed to raise interrupts
static EXTI_ENABLED: AtomicU16 = AtomicU16::new(0);
/// Shadow of RTENR
static EXTI_RISING: AtomicU16 = AtomicU16::new(0);
/// Shadow of FTENR
static EXTI_FALLING: AtomicU16 = AtomicU16::new(0);

/// EXTI controller implementing the meter's interrupt seam
#[derive(Debug, Default)]
pub struct ExtiInterrupts;

impl ExtiInterrupts {
    pub const fn new() -> Self {
        Self
    }

    pub fn is_enabled(&self, gpio: GpioId) -> bool {
        EXTI_ENABLED.load(Ordering::Relaxed) & line_bit(gpio) != 0
    }

    fn configure_edges(bit: u16, trigger: EdgeTrigger) {
        let (rising, falling) = match trigger {
            EdgeTrigger::Rising => (true, false),
            EdgeTrigger::Falling => (false, true),
            EdgeTrigger::Both => (true, true),
        };
        if rising {
            EXTI_RISING.fetch_or(bit, Ordering::Relaxed);
        } else {
            EXTI_RISING.fetch_and(!bit, Ordering::Relaxed);
        }
        if falling {
            EXTI_FALLING.fetch_or(bit, Ordering::Relaxed);
        } else {
            EXTI_FALLING.fetch_and(!bit, Ordering::Relaxed);
        }
        // Implementation would mirror the shadows into:
        // 1. AFIO_EXTICR to route the port pin onto the line
        // 2. EXTI_RTENR / EXTI_FTENR for the edge selection
    }
}

fn line_bit(gpio: GpioId) -> u16 {
    1 << gpio.number()
}

impl InterruptController for ExtiInterrupts {
    fn attach(&mut self, gpio: GpioId, handler: fn(), trigger: EdgeTrigger) -> Result<(), HalError> {
        let line = gpio.number() as usize;
        if line >= EXTI_LINES {
            return Err(HalError::InvalidPin);
        }

        let bit = line_bit(gpio);
        Self::configure_edges(bit, trigger);
        critical_section::with(|cs| EXTI_HANDLERS[line].borrow(cs).set(Some(handler)));
        EXTI_ENABLED.fetch_or(bit, Ordering::Release);

        #[cfg(feature = "defmt")]
        defmt::trace!("EXTI{} enabled ({})", line, trigger);

        Ok(())
    }

    fn detach(&mut self, gpio: GpioId) -> Result<(), HalError> {
        let line = gpio.number() as usize;
        if line >= EXTI_LINES {
            return Err(HalError::InvalidPin);
        }

        // Masked and cleared in one critical section: no ISR can be between
        // the mask check and the handler call when this returns
        critical_section::with(|cs| {
            EXTI_ENABLED.fetch_and(!line_bit(gpio), Ordering::Release);
            EXTI_HANDLERS[line].borrow(cs).set(None);
        });

        #[cfg(feature = "defmt")]
        defmt::trace!("EXTI{} disabled", line);

        Ok(())
    }
}

/// Forward one EXTI line to its installed handler (interrupt context)
#[inline]
pub fn on_exti(line: u8) {
    if line as usize >= EXTI_LINES || EXTI_ENABLED.load(Ordering::Acquire) & (1 << line) == 0 {
        return;
    }
    let handler = critical_section::with(|cs| EXTI_HANDLERS[line as usize].borrow(cs).get());
    if let Some(handler) = handler {
        handler();
    }
}

/// Shared EXTI interrupt handler; `pending` is the EXTI_INTFR snapshot
pub fn handle_exti_interrupt(pending: u16) {
    let mut pending = pending & EXTI_ENABLED.load(Ordering::Acquire);
    while pending != 0 {
        let line = pending.trailing_zeros() as u8;
        on_exti(line);
        pending &= pending - 1;
    }
}

/// EXTI and PFIC register access for the vector handlers in `main.rs`
#[cfg(target_arch = "riscv32")]
pub mod exti_regs {
    use core::ptr::{read_volatile, write_volatile};

    const EXTI_INTFR: *mut u32 = 0x4001_0414 as *mut u32;
    const PFIC_IENR1: *mut u32 = 0xE000_E100 as *mut u32;
    const PFIC_IENR2: *mut u32 = 0xE000_E104 as *mut u32;

    /// EXTI0..EXTI4 are IRQ 22..26
    const EXTI0_4_IRQ_BITS: u32 = 0x1F << 22;
    /// EXTI9_5 is IRQ 39
    const EXTI9_5_IRQ_BIT: u32 = 1 << (39 - 32);
    /// EXTI15_10 is IRQ 56
    const EXTI15_10_IRQ_BIT: u32 = 1 << (56 - 32);

    /// Line masks served by each EXTI vector
    pub const EXTI9_5_LINES: u16 = 0x03E0;
    pub const EXTI15_10_LINES: u16 = 0xFC00;

    /// Unmask every EXTI vector in the PFIC; per-line gating stays in INTENR
    pub fn enable_vectors() {
        // SAFETY: write-1-to-set registers, other bits are unaffected
        unsafe {
            write_volatile(PFIC_IENR1, EXTI0_4_IRQ_BITS);
            write_volatile(PFIC_IENR2, EXTI9_5_IRQ_BIT | EXTI15_10_IRQ_BIT);
        }
    }

    /// Snapshot and clear the pending `lines`, then dispatch them
    pub fn service(lines: u16) {
        // SAFETY: INTFR is write-1-to-clear; only the lines read are cleared
        let pending = unsafe {
            let pending = read_volatile(EXTI_INTFR) & lines as u32;
            write_volatile(EXTI_INTFR, pending);
            pending as u16
        };
        super::handle_exti_interrupt(pending);
    }
}

/// SEL output pin (push-pull)
pub struct SelectPin {
    number: u8,
    state: AtomicBool,
}

impl SelectPin {
    pub const fn new(number: u8) -> Self {
        Self {
            number,
            state: AtomicBool::new(false),
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn is_high(&self) -> bool {
        self.state.load(Ordering::Relaxed)
    }

    fn write(&self, high: bool) {
        self.state.store(high, Ordering::Relaxed);
        // Implementation would write GPIOx_BSHR / GPIOx_BCR here
        #[cfg(feature = "defmt")]
        defmt::trace!("SEL GPIO{}: {}", self.number, high);
    }
}

impl ErrorType for SelectPin {
    type Error = Infallible;
}

impl OutputPin for SelectPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}

/// Metering IC wiring on the board
pub mod pins {
    /// SEL: high routes current onto CF1
    pub const SEL_PIN: u8 = 5;

    /// CF1: current / voltage pulse output
    pub const CF1_PIN: u8 = 13;

    /// CF: active power pulse output
    pub const CF_PIN: u8 = 14;

    pub const SEL_HIGH_MEANS_CURRENT: bool = true;
}

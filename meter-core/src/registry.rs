//! Interrupt registry and trampoline dispatch
//!
//! Board interrupt vectors take a plain `fn()` with no context. Each
//! interrupt-capable GPIO therefore gets one precompiled trampoline that looks
//! up its slot here and forwards the edge to whichever meter owns the pin.

use core::cell::Cell;
use critical_section::Mutex;

use crate::hal::{EdgeTrigger, HalError, InterruptController};
use crate::types::{GpioId, SLOT_COUNT};

/// Receiver of edge interrupts
pub trait EdgeHandler: Sync {
    /// Runs in interrupt context: timestamp capture and channel selection
    /// only. No allocation, no formatting, no floating point.
    fn handle_edge(&self, gpio: GpioId);
}

type Owner = &'static dyn EdgeHandler;
type Slot = Mutex<Cell<Option<Owner>>>;

const EMPTY_SLOT: Slot = Mutex::new(Cell::new(None));

/// One trampoline per registry slot
pub type TrampolineBank = [fn(); SLOT_COUNT];

/// Fixed table mapping interrupt-capable GPIOs to their owner.
///
/// Mutated from main context only; read by the trampolines. Declare one with
/// [`interrupt_registry!`](crate::interrupt_registry), which also generates
/// the trampoline bank bound to it.
pub struct InterruptRegistry {
    slots: [Slot; SLOT_COUNT],
    trampolines: TrampolineBank,
}

impl InterruptRegistry {
    pub const fn new(trampolines: TrampolineBank) -> Self {
        Self {
            slots: [EMPTY_SLOT; SLOT_COUNT],
            trampolines,
        }
    }

    /// Bind `gpio` to `owner` and enable its line.
    ///
    /// A slot held by another owner is taken over silently; the evicted owner
    /// is returned. The line stays disabled while the slot changes hands.
    pub fn attach<I>(
        &self,
        gpio: GpioId,
        owner: Owner,
        trigger: EdgeTrigger,
        interrupts: &mut I,
    ) -> Result<Option<Owner>, HalError>
    where
        I: InterruptController + ?Sized,
    {
        let slot = &self.slots[gpio.slot()];

        interrupts.detach(gpio)?;
        let previous = critical_section::with(|cs| slot.borrow(cs).replace(Some(owner)));

        if let Err(e) = interrupts.attach(gpio, self.trampolines[gpio.slot()], trigger) {
            critical_section::with(|cs| slot.borrow(cs).set(None));
            return Err(e);
        }

        let evicted = previous.filter(|prev| !same_owner(*prev, owner));

        #[cfg(feature = "defmt")]
        if evicted.is_some() {
            defmt::warn!("GPIO{} taken over from previous owner", gpio.number());
        } else {
            defmt::debug!("GPIO{} interrupt attached", gpio.number());
        }

        Ok(evicted)
    }

    /// Disable `gpio` and clear its slot, but only if `owner` holds it.
    ///
    /// Returns whether anything was detached.
    pub fn detach<I>(&self, gpio: GpioId, owner: Owner, interrupts: &mut I) -> Result<bool, HalError>
    where
        I: InterruptController + ?Sized,
    {
        if !self.is_owned_by(gpio, owner) {
            return Ok(false);
        }

        interrupts.detach(gpio)?;
        critical_section::with(|cs| self.slots[gpio.slot()].borrow(cs).set(None));

        #[cfg(feature = "defmt")]
        defmt::debug!("GPIO{} interrupt detached", gpio.number());

        Ok(true)
    }

    pub fn owner(&self, gpio: GpioId) -> Option<Owner> {
        critical_section::with(|cs| self.slots[gpio.slot()].borrow(cs).get())
    }

    pub fn is_owned_by(&self, gpio: GpioId, owner: Owner) -> bool {
        self.owner(gpio).is_some_and(|current| same_owner(current, owner))
    }

    /// Trampoline entry point (interrupt context)
    #[inline]
    pub fn dispatch(&self, slot: usize) {
        let Some(gpio) = GpioId::from_slot(slot) else {
            return;
        };
        if let Some(owner) = self.owner(gpio) {
            owner.handle_edge(gpio);
        }
    }
}

/// Identity of the owning object, ignoring vtables
fn same_owner(a: Owner, b: Owner) -> bool {
    core::ptr::eq(a as *const dyn EdgeHandler as *const (), b as *const dyn EdgeHandler as *const ())
}

/// Declare a `static` [`InterruptRegistry`] together with its trampoline bank.
///
/// ```ignore
/// meter_core::interrupt_registry!(pub static REGISTRY);
/// ```
#[macro_export]
macro_rules! interrupt_registry {
    ($(#[$meta:meta])* $vis:vis static $name:ident) => {
        $(#[$meta])*
        $vis static $name: $crate::registry::InterruptRegistry =
            $crate::registry::InterruptRegistry::new(
                $crate::__trampoline_bank!($name; 0 1 2 3 4 5 6 7 8 9)
            );
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __trampoline_bank {
    ($registry:ident; $($slot:literal)*) => {
        [$({
            fn trampoline() {
                $registry.dispatch($slot)
            }
            trampoline as fn()
        }),*]
    };
}

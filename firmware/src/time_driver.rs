//! Microsecond embassy time driver for the CH32V203
//!
//! [`init`] programs SysTick for a 1 ms period and its ISR calls
//! [`on_systick`]. `now()` adds the live SysTick count so timestamps resolve
//! single microseconds, which pulse periods of a few milliseconds need. The
//! one alarm is checked on every tick.

use core::cell::Cell;
use core::ptr::{read_volatile, write_volatile};
use critical_section::Mutex;
use embassy_time_driver::{AlarmHandle, Driver};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

/// Microseconds per SysTick interrupt
pub const TICK_PERIOD_US: u64 = 1_000;

/// SysTick counts per microsecond (HCLK / 8 at 72 MHz)
const COUNTS_PER_US: u32 = 9;

const STK_CTLR: *mut u32 = 0xE000_F000 as *mut u32;
const STK_SR: *mut u32 = 0xE000_F004 as *mut u32;
const STK_CNTL: *mut u32 = 0xE000_F008 as *mut u32;
const STK_CMPLR: *mut u32 = 0xE000_F010 as *mut u32;

/// STE | STIE | STRE, HCLK / 8, counting up
const STK_CTLR_RUN: u32 = 0b1011;
/// SysTick is IRQ 12
const PFIC_IENR1: *mut u32 = 0xE000_E100 as *mut u32;
const SYSTICK_IRQ_BIT: u32 = 1 << 12;

fn counts() -> u32 {
    // SAFETY: read-only access to the SysTick counter
    unsafe { read_volatile(STK_CNTL) }
}

/// Compare flag: the counter reloaded but `tick()` has not run yet
fn reload_pending() -> bool {
    // SAFETY: read-only access to the SysTick status register
    unsafe { read_volatile(STK_SR) & 1 != 0 }
}

struct Alarm {
    timestamp: Cell<u64>,
    callback: Cell<Option<fn(*mut ())>>,
    ctx: Cell<usize>,
}

pub struct SysTickDriver {
    /// Microseconds at the last SysTick interrupt
    base_us: AtomicU64,
    alarm_taken: AtomicBool,
    alarm: Mutex<Alarm>,
}

impl SysTickDriver {
    const fn new() -> Self {
        Self {
            base_us: AtomicU64::new(0),
            alarm_taken: AtomicBool::new(false),
            alarm: Mutex::new(Alarm {
                timestamp: Cell::new(u64::MAX),
                callback: Cell::new(None),
                ctx: Cell::new(0),
            }),
        }
    }

    fn tick(&self) {
        self.base_us.fetch_add(TICK_PERIOD_US, Ordering::Relaxed);

        let now = self.now();
        let due = critical_section::with(|cs| {
            let alarm = self.alarm.borrow(cs);
            if alarm.timestamp.get() > now {
                return None;
            }
            alarm.timestamp.set(u64::MAX);
            alarm.callback.get().map(|callback| (callback, alarm.ctx.get()))
        });
        if let Some((callback, ctx)) = due {
            callback(ctx as *mut ());
        }
    }
}

impl Driver for SysTickDriver {
    fn now(&self) -> u64 {
        critical_section::with(|_| {
            let base = self.base_us.load(Ordering::Relaxed);
            let within = (counts() / COUNTS_PER_US) as u64;
            if reload_pending() {
                // Reloaded while interrupts are off: count the missed tick
                base + TICK_PERIOD_US + (counts() / COUNTS_PER_US) as u64
            } else {
                base + within.min(TICK_PERIOD_US - 1)
            }
        })
    }

    unsafe fn allocate_alarm(&self) -> Option<AlarmHandle> {
        if self.alarm_taken.swap(true, Ordering::Relaxed) {
            None
        } else {
            Some(AlarmHandle::new(0))
        }
    }

    fn set_alarm_callback(&self, _alarm: AlarmHandle, callback: fn(*mut ()), ctx: *mut ()) {
        critical_section::with(|cs| {
            let alarm = self.alarm.borrow(cs);
            alarm.callback.set(Some(callback));
            alarm.ctx.set(ctx as usize);
        });
    }

    fn set_alarm(&self, _alarm: AlarmHandle, timestamp: u64) -> bool {
        critical_section::with(|cs| {
            if timestamp <= self.now() {
                return false;
            }
            self.alarm.borrow(cs).timestamp.set(timestamp);
            true
        })
    }
}

embassy_time_driver::time_driver_impl!(static DRIVER: SysTickDriver = SysTickDriver::new());

/// Start SysTick; call once before the executor runs
pub fn init() {
    // SAFETY: SysTick is owned by this driver
    unsafe {
        write_volatile(STK_CTLR, 0);
        write_volatile(STK_CNTL, 0);
        write_volatile(STK_CMPLR, COUNTS_PER_US * TICK_PERIOD_US as u32 - 1);
        write_volatile(STK_SR, 0);
        write_volatile(STK_CTLR, STK_CTLR_RUN);
        write_volatile(PFIC_IENR1, SYSTICK_IRQ_BIT);
    }
}

/// SysTick interrupt handler body
pub fn on_systick() {
    // SAFETY: clearing the compare flag acknowledges the interrupt
    unsafe { write_volatile(STK_SR, 0) };
    DRIVER.tick();
}

// Critical section implementation for single-core RISC-V
critical_section::set_impl!(RiscvCriticalSection);

struct RiscvCriticalSection;

unsafe impl critical_section::Impl for RiscvCriticalSection {
    unsafe fn acquire() -> u8 {
        let mut mstatus: usize;
        core::arch::asm!("csrrci {}, mstatus, 8", out(reg) mstatus);
        (mstatus & 8) as u8
    }

    unsafe fn release(was_active: u8) {
        if was_active != 0 {
            core::arch::asm!("csrsi mstatus, 8");
        }
    }
}

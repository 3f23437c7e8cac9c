//! Pulse timing shared between interrupt and main context
//!
//! The interrupt side only stores `u32` timestamps and counters, each a single
//! native-width atomic. Everything that needs floating point happens on the
//! read side.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::hal::MonotonicClock;
use crate::registry::EdgeHandler;
use crate::types::{Channel, GpioId, PinAssignment, SamplingMode, Wiring};

/// Sentinel for an unassigned pin
const NO_PIN: u8 = u8::MAX;

/// Consistent view of a timer's edge history
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EdgeSnapshot {
    pub last_edge: u32,
    pub edges: u32,
}

/// Interval measurement for one pulse line.
/// Single writer (interrupt), single reader (main context).
pub struct PulseTimer {
    last_edge: AtomicU32,
    /// Latest edge-to-edge interval in microseconds, 0 = no data
    interval: AtomicU32,
    edges: AtomicU32,
    primed: AtomicBool,
}

impl PulseTimer {
    pub const fn new() -> Self {
        Self {
            last_edge: AtomicU32::new(0),
            interval: AtomicU32::new(0),
            edges: AtomicU32::new(0),
            primed: AtomicBool::new(false),
        }
    }

    /// Record an edge (called from interrupt context)
    ///
    /// An edge after more than `timeout_us` of silence drops the last
    /// interval and only re-primes the timer: the gap is not a period, and
    /// the period before it is stale.
    #[inline]
    pub fn on_edge(&self, now: u32, timeout_us: u32) {
        if self.primed.load(Ordering::Relaxed) {
            let interval = now.wrapping_sub(self.last_edge.load(Ordering::Relaxed));
            if interval > timeout_us {
                self.interval.store(0, Ordering::Relaxed);
            } else if interval != 0 {
                self.interval.store(interval, Ordering::Relaxed);
            }
        }
        self.last_edge.store(now, Ordering::Relaxed);
        self.primed.store(true, Ordering::Relaxed);
        self.edges.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest interval, or `None` if the line has been quiet for longer than
    /// `timeout_us`. A timed-out interval is discarded, not kept for later.
    pub fn interval(&self, now: u32, timeout_us: u32) -> Option<u32> {
        let interval = self.interval.load(Ordering::Relaxed);
        if interval == 0 {
            return None;
        }
        if now.wrapping_sub(self.last_edge.load(Ordering::Relaxed)) > timeout_us {
            // Fails harmlessly if an edge stored a fresh interval meanwhile
            let _ = self
                .interval
                .compare_exchange(interval, 0, Ordering::Relaxed, Ordering::Relaxed);
            return None;
        }
        Some(interval)
    }

    /// Latest interval without the staleness check.
    /// Used for a multiplexed channel that is not routed right now.
    pub fn held(&self) -> Option<u32> {
        match self.interval.load(Ordering::Relaxed) {
            0 => None,
            interval => Some(interval),
        }
    }

    /// Total edges seen, wrapping
    pub fn edges(&self) -> u32 {
        self.edges.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> EdgeSnapshot {
        critical_section::with(|_| EdgeSnapshot {
            last_edge: self.last_edge.load(Ordering::Relaxed),
            edges: self.edges.load(Ordering::Relaxed),
        })
    }

    /// Restart edge timing from `now`, keeping the last interval.
    ///
    /// Only call while no edge can be routed to this timer.
    pub fn rearm(&self, now: u32) {
        self.primed.store(false, Ordering::Relaxed);
        self.last_edge.store(now, Ordering::Relaxed);
    }

    /// Forget everything
    pub fn clear(&self) {
        self.primed.store(false, Ordering::Relaxed);
        self.interval.store(0, Ordering::Relaxed);
    }
}

impl Default for PulseTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-visible half of a meter: pin routing plus one timer per channel.
///
/// Lives in a `static` so the interrupt registry can hand out
/// `&'static dyn EdgeHandler` references to it.
pub struct PulseFrontend<C> {
    clock: C,
    timers: [PulseTimer; 3],
    power_pin: AtomicU8,
    shared_pin: AtomicU8,
    voltage_pin: AtomicU8,
    mode: AtomicU8,
    timeout_us: AtomicU32,
}

impl<C: MonotonicClock> PulseFrontend<C> {
    pub const fn new(clock: C) -> Self {
        Self {
            clock,
            timers: [PulseTimer::new(), PulseTimer::new(), PulseTimer::new()],
            power_pin: AtomicU8::new(NO_PIN),
            shared_pin: AtomicU8::new(NO_PIN),
            voltage_pin: AtomicU8::new(NO_PIN),
            mode: AtomicU8::new(SamplingMode::Current as u8),
            timeout_us: AtomicU32::new(u32::MAX),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> u32 {
        self.clock.now_micros()
    }

    pub fn timer(&self, channel: Channel) -> &PulseTimer {
        &self.timers[channel.index()]
    }

    pub fn timeout_us(&self) -> u32 {
        self.timeout_us.load(Ordering::Relaxed)
    }

    /// Load pin routing. Call with the lines detached.
    pub fn configure(&self, pins: &PinAssignment, wiring: Wiring, timeout_us: u32) {
        self.power_pin.store(pins.power_pulse.number(), Ordering::Relaxed);
        self.shared_pin.store(pins.current_pulse.number(), Ordering::Relaxed);
        let voltage = match wiring {
            Wiring::Multiplexed => NO_PIN,
            Wiring::Independent { voltage_pin } => voltage_pin.number(),
        };
        self.voltage_pin.store(voltage, Ordering::Relaxed);
        self.timeout_us.store(timeout_us, Ordering::Relaxed);
        self.mode.store(SamplingMode::Current as u8, Ordering::Relaxed);
        for timer in &self.timers {
            timer.clear();
        }
    }

    /// Quantity the CF1 edges are currently credited to
    pub fn routed(&self) -> SamplingMode {
        SamplingMode::from_bits(self.mode.load(Ordering::Relaxed))
    }

    pub(crate) fn route(&self, mode: SamplingMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }
}

impl<C: MonotonicClock + Sync> EdgeHandler for PulseFrontend<C> {
    #[inline]
    fn handle_edge(&self, gpio: GpioId) {
        let now = self.clock.now_micros();
        let timeout = self.timeout_us.load(Ordering::Relaxed);
        let pin = gpio.number();

        // Not exclusive: one pin wired to two uses feeds both timers
        if pin == self.power_pin.load(Ordering::Relaxed) {
            self.timers[Channel::Power.index()].on_edge(now, timeout);
        }
        if pin == self.shared_pin.load(Ordering::Relaxed) {
            let channel = self.routed().channel();
            self.timers[channel.index()].on_edge(now, timeout);
        }
        if pin == self.voltage_pin.load(Ordering::Relaxed) {
            self.timers[Channel::Voltage.index()].on_edge(now, timeout);
        }
    }
}

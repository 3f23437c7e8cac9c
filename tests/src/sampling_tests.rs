//! SEL line behaviour checked against exact pin transactions

#[cfg(test)]
mod tests {
    use crate::Rig;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction};
    use embedded_hal_mock::eh1::MockError;
    use std::io::ErrorKind;
    use meter_core::hal::mock::{MockClock, MockInterrupts};
    use meter_core::{
        HalError, InterruptRegistry, MeterConfig, MeterError, PinAssignment, PulseMeter, SamplingMode,
        Sensor,
    };

    type MockedMeter = PulseMeter<&'static MockClock, MockInterrupts, PinMock>;

    const SECOND: u64 = 1_000_000;

    fn meter(rig: &Rig, registry: &'static InterruptRegistry, pin: &PinMock) -> MockedMeter {
        PulseMeter::new(rig.frontend, registry, rig.irq.clone(), pin.clone(), MeterConfig::default())
    }

    #[test]
    fn test_select_transactions_begin_then_posts() {
        println!("\n=== SEL transactions ===");
        meter_core::interrupt_registry!(static REGISTRY);

        let expectations = [
            Transaction::set(State::High),
            Transaction::set(State::Low),
            Transaction::set(State::High),
        ];
        let pin = PinMock::new(&expectations);
        let rig = Rig::new();
        let mut meter = meter(&rig, &REGISTRY, &pin);

        meter.begin().unwrap();
        assert_eq!(meter.mode(), SamplingMode::Current);

        assert!(meter.wants_post());
        meter.post().unwrap();
        assert_eq!(meter.mode(), SamplingMode::Voltage);
        meter.post().unwrap();
        assert_eq!(meter.mode(), SamplingMode::Current);

        pin.clone().done();
    }

    #[test]
    fn test_inverted_select_polarity() {
        meter_core::interrupt_registry!(static REGISTRY);

        let expectations = [Transaction::set(State::Low), Transaction::set(State::High)];
        let pin = PinMock::new(&expectations);
        let rig = Rig::new();
        let mut meter = meter(&rig, &REGISTRY, &pin).with_pins(PinAssignment::new(5, 13, 14, false).unwrap());

        meter.begin().unwrap();
        meter.post().unwrap();
        assert_eq!(meter.mode(), SamplingMode::Voltage);

        pin.clone().done();
    }

    #[test]
    fn test_post_before_begin_touches_nothing() {
        meter_core::interrupt_registry!(static REGISTRY);

        let pin = PinMock::new(&[]);
        let rig = Rig::new();
        let mut meter = meter(&rig, &REGISTRY, &pin);

        assert_eq!(meter.post(), Err(MeterError::NotInitialized));
        assert_eq!(meter.mode(), SamplingMode::Current);

        pin.clone().done();
    }

    #[test]
    fn test_select_failure_surfaces_from_begin() {
        meter_core::interrupt_registry!(static REGISTRY);

        let expectations = [Transaction::set(State::High).with_error(MockError::Io(ErrorKind::NotConnected))];
        let pin = PinMock::new(&expectations);
        let rig = Rig::new();
        let mut meter = meter(&rig, &REGISTRY, &pin);

        assert_eq!(meter.begin(), Err(MeterError::Hal(HalError::Gpio)));
        assert!(!meter.ready());
        assert!(meter.attached().is_empty());

        pin.clone().done();
    }

    /// After a switch the incoming channel keeps its old period until a fresh
    /// pair of edges is timed; the first edge after the switch only primes
    #[test]
    fn test_switch_rearms_incoming_channel() {
        meter_core::interrupt_registry!(static REGISTRY);

        let expectations = [
            Transaction::set(State::High),
            Transaction::set(State::Low),
            Transaction::set(State::High),
        ];
        let pin = PinMock::new(&expectations);
        let rig = Rig::new();
        let mut meter = meter(&rig, &REGISTRY, &pin);
        let mut sim = rig.simulator();
        let cf1 = PinAssignment::default().current_pulse;

        meter.begin().unwrap();
        sim.start_train(cf1, 20_000);
        sim.advance_us(SECOND);
        let current = meter.current();
        assert!(current > 0.0);

        meter.post().unwrap();
        sim.start_train(cf1, 2_000);
        sim.advance_us(SECOND);
        let voltage = meter.voltage();
        assert!(voltage > 0.0);

        meter.post().unwrap();
        assert_eq!(meter.current(), current);
        assert_eq!(meter.voltage(), voltage, "voltage holds its last period");

        sim.advance_us(2_000);
        assert_eq!(meter.current(), current, "one edge only primes the timer");

        sim.advance_us(2_000);
        assert!(meter.current() > current, "new period is the faster train");

        pin.clone().done();
    }
}

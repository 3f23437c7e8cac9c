//! Calibration: ratio accessors, expected-value self-calibration, properties

#[cfg(test)]
mod tests {
    use crate::Rig;
    use meter_core::convert::{from_period, period_seconds};
    use meter_core::{
        Calibration, CalibrationRatios, Channel, ChipConstants, EdgeTrigger, MeterConfig, MeterError,
        MonotonicClock, PinAssignment, ResistorConstants, SamplingMode, Sensor,
    };
    use proptest::prelude::*;

    const SECOND: u64 = 1_000_000;

    fn sonoff() -> CalibrationRatios {
        CalibrationRatios::from_resistors(&ResistorConstants::SONOFF_POW, &ChipConstants::HLW8012)
    }

    /// 5 A reference load producing a steady 10 ms period
    #[test]
    fn test_self_calibration_from_expected_current() {
        println!("\n=== Self-calibration, 5 A reference ===");
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let mut sim = rig.simulator();
        meter.begin().unwrap();

        sim.start_train(PinAssignment::default().current_pulse, 10_000);
        let started = sim.elapsed_us();
        let ratio = meter
            .calibrate_from_expected(Channel::Current, 5.0, &mut sim)
            .unwrap();

        println!("New current ratio: {}", ratio);
        assert!((ratio - 0.05).abs() < 1e-12);
        assert_eq!(meter.ratio(Channel::Current), ratio);
        assert!(sim.elapsed_us() - started >= 3 * SECOND, "window runs its full length");

        let current = meter.current();
        println!("Current after calibration: {} A", current);
        assert!((current - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_self_calibration_without_pulses_keeps_ratio() {
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let mut sim = rig.simulator();
        meter.begin().unwrap();

        let before = meter.ratio(Channel::Power);
        let result = meter.calibrate_from_expected(Channel::Power, 60.0, &mut sim);

        assert_eq!(result, Err(MeterError::CalibrationFailed));
        assert_eq!(meter.ratio(Channel::Power), before);
        assert!(!meter.calibration().is_explicit(Channel::Power));
    }

    #[test]
    fn test_self_calibration_single_edge_is_not_enough() {
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let mut sim = rig.simulator();
        meter.begin().unwrap();

        // Period longer than the window: at most one edge lands inside it
        sim.start_train(PinAssignment::default().power_pulse, 2_900_000);
        let result = meter.calibrate_from_expected(Channel::Power, 1.0, &mut sim);
        assert_eq!(result, Err(MeterError::CalibrationFailed));
    }

    #[test]
    fn test_self_calibration_rejects_bad_expected_value() {
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let mut sim = rig.simulator();
        meter.begin().unwrap();

        assert_eq!(
            meter.calibrate_from_expected(Channel::Voltage, 0.0, &mut sim),
            Err(MeterError::ConfigurationInvalid)
        );
        assert_eq!(sim.elapsed_us(), 0, "rejected before sampling");
    }

    #[tokio::test]
    async fn test_async_voltage_calibration_switches_select() {
        println!("\n=== Async self-calibration, 230 V reference ===");
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let mut sim = rig.simulator();
        meter.begin().unwrap();
        assert_eq!(meter.mode(), SamplingMode::Current);

        sim.start_train(PinAssignment::default().current_pulse, 1_776);
        let ratio = meter
            .calibrate_from_expected_async(Channel::Voltage, 230.0, &mut sim)
            .await
            .unwrap();

        assert_eq!(meter.mode(), SamplingMode::Voltage);
        assert_eq!(rig.sel.level(), Some(false));
        assert!((ratio - 230.0 * 0.001_776).abs() < 1e-9);
        assert!((meter.voltage() - 230.0).abs() < 1e-6);
    }

    #[test]
    fn test_async_calibration_failure_keeps_ratio() {
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let mut sim = rig.simulator();
        meter.begin().unwrap();

        let before = meter.ratio(Channel::Current);
        let result = tokio_test::block_on(meter.calibrate_from_expected_async(Channel::Current, 2.0, &mut sim));

        assert_eq!(result, Err(MeterError::CalibrationFailed));
        assert_eq!(meter.ratio(Channel::Current), before);
        assert!(sim.elapsed_us() >= MeterConfig::default().calibration_window_us as u64);
    }

    /// The simulator is the delay: sleeping moves the meter's clock
    #[test]
    fn test_simulator_delay_drives_clock() {
        let rig = Rig::new();
        let mut sim = rig.simulator();

        embedded_hal::delay::DelayNs::delay_ms(&mut sim, 5);
        assert_eq!(rig.clock.now_micros(), 5_000);

        // Sub-microsecond sleeps carry over instead of being dropped
        for _ in 0..4 {
            embedded_hal::delay::DelayNs::delay_ns(&mut sim, 250);
        }
        assert_eq!(sim.elapsed_us(), 5_001);

        tokio_test::block_on(embedded_hal_async::delay::DelayNs::delay_us(&mut sim, 999));
        assert_eq!(rig.clock.now_micros(), 6_000);
    }

    #[test]
    fn test_reset_ratios_restores_resistor_model() {
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        meter.set_ratio(Channel::Current, 0.05).unwrap();
        meter.set_divisor(Channel::Voltage, 2.0).unwrap();
        meter.begin().unwrap();

        // Explicit ratios survive begin()
        assert_eq!(meter.ratio(Channel::Current), 0.05);
        assert_eq!(meter.ratio(Channel::Voltage), 0.5);

        meter.reset_ratios();
        assert_eq!(meter.calibration().ratios(), sonoff());
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        meter_core::interrupt_registry!(static REGISTRY);

        let rig = Rig::new();
        let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
        let before = meter.ratio(Channel::Power);

        assert_eq!(meter.set_ratio(Channel::Power, 0.0), Err(MeterError::ConfigurationInvalid));
        assert_eq!(meter.set_divisor(Channel::Power, -1.0), Err(MeterError::ConfigurationInvalid));
        assert_eq!(meter.ratio(Channel::Power), before);
    }

    fn channel() -> impl Strategy<Value = Channel> {
        prop_oneof![Just(Channel::Current), Just(Channel::Voltage), Just(Channel::Power)]
    }

    proptest! {
        #[test]
        fn prop_value_decreases_with_period(
            ratio in 1e-6f64..1e4,
            short in 1u32..1_000_000,
            extra in 1u32..1_000_000,
        ) {
            let fast = from_period(ratio, period_seconds(short, EdgeTrigger::Rising));
            let slow = from_period(ratio, period_seconds(short + extra, EdgeTrigger::Rising));
            prop_assert!(slow < fast);
        }

        #[test]
        fn prop_ratio_round_trip(
            settings in proptest::collection::vec((channel(), 1e-6f64..1e6), 1..10),
        ) {
            let mut calibration = Calibration::new(sonoff());
            for &(channel, ratio) in &settings {
                calibration.set_ratio(channel, ratio).unwrap();
            }
            for channel in Channel::ALL {
                let last = settings.iter().rev().find(|(c, _)| *c == channel).map(|(_, r)| *r);
                let expected = last.unwrap_or_else(|| sonoff().get(channel));
                prop_assert_eq!(calibration.ratio(channel), expected);
            }
        }

        #[test]
        fn prop_divisor_inverts_ratio(channel in channel(), divisor in 1e-6f64..1e6) {
            let mut calibration = Calibration::new(sonoff());
            calibration.set_divisor(channel, divisor).unwrap();
            let back = calibration.divisor(channel);
            prop_assert!((back - divisor).abs() <= divisor * 1e-12);
        }
    }
}

// Host-side smoke run of a simulated Sonoff POW

use heapless::Vec;
use meter_core::sensor::MAX_SLOTS;
use meter_core::{read_cycle, Channel, MeterConfig, PinAssignment, Reading, Sensor};
use meter_tests::Rig;

meter_core::interrupt_registry!(static REGISTRY);

fn main() {
    println!("🧪 Pulse Meter Smoke Run");

    // Test 1: Steady load on both pulse lines
    test_read_cycles();

    // Test 2: Self-calibration against a reference load
    test_calibration();

    println!("✅ Smoke run complete");
    println!();
    println!("📝 Run the full suite with: cargo test");
}

/// Three read cycles, SEL flipping in between
fn test_read_cycles() {
    println!("🔧 Simulating a 100 W / 230 V load...");

    let rig = Rig::new();
    let mut meter = rig.meter(&REGISTRY, MeterConfig::default());
    let mut sim = rig.simulator();
    meter.begin().expect("begin");
    println!("  {}", meter.description());

    let pins = PinAssignment::default();
    let power_period = (meter.ratio(Channel::Power) / 100.0 * 1e6) as u32;
    let current_period = (meter.ratio(Channel::Current) / 0.435 * 1e6) as u32;
    let voltage_period = (meter.ratio(Channel::Voltage) / 230.0 * 1e6) as u32;
    sim.start_train(pins.power_pulse, power_period);

    let mut readings: Vec<Reading, MAX_SLOTS> = Vec::new();
    for cycle in 0..3 {
        let cf1_period = match meter.mode().channel() {
            Channel::Voltage => voltage_period,
            _ => current_period,
        };
        sim.start_train(pins.current_pulse, cf1_period);
        sim.advance_us(6_000_000);

        read_cycle(&mut meter, &mut readings).expect("read cycle");
        println!("  Cycle {}:", cycle);
        for reading in &readings {
            println!(
                "    {:<14} {:>9.3} {}",
                format!("{:?}", reading.magnitude),
                reading.value,
                reading.magnitude.unit()
            );
        }
    }

    let power = meter.active_power();
    assert!((power - 100.0).abs() < 1.0);
    println!("  ✅ Read cycles working ({} edges)", sim.edges_fired());
}

fn test_calibration() {
    println!("🎯 Calibrating against a 60 W bulb...");

    let rig = Rig::new();
    let mut meter = rig
        .meter(&REGISTRY, MeterConfig::default())
        .with_pins(PinAssignment::new(5, 4, 12, true).expect("pins"));
    let mut sim = rig.simulator();
    meter.begin().expect("begin");

    let before = meter.ratio(Channel::Power);
    sim.start_train(meter.pins().power_pulse, 150_000);
    let ratio = meter
        .calibrate_from_expected(Channel::Power, 60.0, &mut sim)
        .expect("calibration");

    println!("  Power ratio {:.4} -> {:.4} W·s", before, ratio);
    assert!((meter.active_power() - 60.0).abs() < 1e-6);
    println!("  ✅ Calibration working");
}

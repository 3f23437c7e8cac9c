#![no_std]
#![no_main]

#[cfg(feature = "defmt")]
use defmt_rtt as _;

// RISC-V runtime
use riscv_rt as _;

// Panic handler
use panic_halt as _;

use embassy_executor::Spawner;
use embassy_time::Duration;

use pulsemeter_firmware::*;

/// Main firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    #[cfg(target_arch = "riscv32")]
    time_driver::init();

    #[cfg(feature = "defmt")]
    defmt::info!("Pulse meter firmware {} starting", VERSION);

    #[cfg(target_arch = "riscv32")]
    exti_regs::enable_vectors();

    let meter = match board_meter() {
        Ok(meter) => meter,
        Err(_e) => {
            #[cfg(feature = "defmt")]
            defmt::error!("Board pins rejected: {}", _e);
            return;
        }
    };

    spawner.must_spawn(meter_task(meter));

    #[cfg(feature = "defmt")]
    defmt::info!("Meter ready, reading every {} s", READ_INTERVAL.as_secs());

    // Main supervision loop
    loop {
        embassy_time::Timer::after(Duration::from_secs(1)).await;
        #[cfg(feature = "defmt")]
        defmt::trace!("Heartbeat");
    }
}

// Interrupt Handlers
// ========================================

/// SysTick: 1 ms time base for the embassy driver
#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn SysTick() {
    time_driver::on_systick();
}

#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI0() {
    exti_regs::service(1 << 0);
}

#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI1() {
    exti_regs::service(1 << 1);
}

#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI2() {
    exti_regs::service(1 << 2);
}

#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI3() {
    exti_regs::service(1 << 3);
}

#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI4() {
    exti_regs::service(1 << 4);
}

/// CF1 (GPIO13) and CF (GPIO14) land here on the board
#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI15_10() {
    exti_regs::service(exti_regs::EXTI15_10_LINES);
}

#[cfg(target_arch = "riscv32")]
#[no_mangle]
extern "C" fn EXTI9_5() {
    exti_regs::service(exti_regs::EXTI9_5_LINES);
}

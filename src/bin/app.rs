#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};

use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, timer::timg::TimerGroup};
use esp_println::println;
use esp_storage::FlashStorage;
use static_cell::StaticCell;

use esp_msc_ota::domain::entity::StatusState;
use esp_msc_ota::infrastructure::drivers::StatusLed;
use esp_msc_ota::infrastructure::repositories::BootManager;
use esp_msc_ota::infrastructure::services::msc;
use esp_msc_ota::infrastructure::tasks::{
    completion_watchdog_task, signal_status, status_led_task,
};

esp_bootloader_esp_idf::esp_app_desc!();

static FLASH_STORAGE: StaticCell<FlashStorage<'static>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    // Initialize hardware
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Heap backs the disk working copy (~50 KB) plus slack
    esp_alloc::heap_allocator!(size: 96 * 1024);

    // Start rtos
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let led = StatusLed::new(peripherals.RMT, peripherals.GPIO18);
    spawner.spawn(status_led_task(led)).ok();

    let flash = FLASH_STORAGE.init(FlashStorage::new(peripherals.FLASH));
    let flash_ptr = flash as *mut FlashStorage<'static>;

    let mut boot = BootManager::new(flash_ptr);
    match boot.current_slot() {
        Ok(slot) => println!("app: running from slot {:?}", slot),
        Err(err) => println!("app: cannot read boot slot: {:?}", err),
    }

    if let Err(err) = msc::init_msc(flash_ptr) {
        // Without a working disk buffer the MSC interface must not be
        // published; park here so the host never sees a half-initialized
        // disk.
        println!("app: disk init failed: {:?}", err);
        loop {
            Timer::after(Duration::from_secs(5)).await;
        }
    }

    spawner.spawn(completion_watchdog_task(boot)).ok();
    signal_status(StatusState::BootloaderStarted);
    println!("app: msc disk ready");

    loop {
        Timer::after(Duration::from_secs(5)).await;
    }
}

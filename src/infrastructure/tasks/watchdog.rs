//! Completion watchdog task.
//!
//! Armed by the write path when a firmware stream is detected; from then on
//! it polls the stream's activity timestamp and, once the idle window
//! elapses, commits `ota_0` as the boot target and restarts the device.
//! There is no cancellation path: finalize always ends in a reset.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use esp_println::println;
use msc_ota_core::watchdog::{CompletionWatchdog, WatchdogVerdict};

use crate::config;
use crate::domain::entity::StatusState;
use crate::infrastructure::repositories::BootManager;
use crate::infrastructure::services::msc;
use crate::infrastructure::tasks::signal_status;

static ARM: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Start the watchdog's poll loop. Idempotent; called once per boot cycle
/// in practice since stream detection fires at most once.
pub(crate) fn arm() {
    ARM.signal(());
}

#[embassy_executor::task]
pub async fn completion_watchdog_task(mut boot: BootManager) {
    ARM.wait().await;
    println!("watchdog: armed");

    let watchdog = CompletionWatchdog::new(config::STREAM_IDLE_TIMEOUT_MS);
    loop {
        Timer::after(Duration::from_millis(config::WATCHDOG_POLL_MS)).await;
        let (streaming, last_activity_ms) = msc::stream_activity();
        let verdict = watchdog.evaluate(streaming, last_activity_ms, Instant::now().as_millis());
        if verdict == WatchdogVerdict::Complete {
            break;
        }
    }

    println!("watchdog: stream idle, committing update");
    signal_status(StatusState::WritingFinished);

    if let Err(err) = boot.commit_update() {
        // No recovery path: the previous image is already erased. Restart
        // regardless; an uncommitted boot target falls back to the old slot.
        println!("watchdog: boot commit failed: {:?}", err);
    }

    signal_status(StatusState::Restarting);
    esp_hal::system::software_reset();
}

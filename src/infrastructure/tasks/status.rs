use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::domain::entity::StatusState;
use crate::infrastructure::drivers::StatusLed;

static STATUS: Signal<CriticalSectionRawMutex, StatusState> = Signal::new();

/// Fire-and-forget status update. Latest state wins.
pub fn signal_status(state: StatusState) {
    STATUS.signal(state);
}

#[embassy_executor::task]
pub async fn status_led_task(mut led: StatusLed<'static>) {
    loop {
        let state = STATUS.wait().await;
        led.show(state);
    }
}

mod status;
pub(crate) mod watchdog;

pub use status::{signal_status, status_led_task};
pub use watchdog::completion_watchdog_task;

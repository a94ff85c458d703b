mod ota_partition;
mod status_led;

pub use ota_partition::OtaPartition;
pub use status_led::StatusLed;

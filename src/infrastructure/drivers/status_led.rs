//! WS2812 status LED driven over the RMT peripheral. One color per
//! [`StatusState`]; brightness kept low on purpose.

use esp_hal::xtensa_lx::interrupt;
use esp_hal::{gpio::interconnect::PeripheralOutput, peripherals::RMT, rmt::Rmt, time::Rate};
use esp_hal_smartled::{SmartLedsAdapter, buffer_size, smart_led_buffer};
use smart_leds::{RGB8, SmartLedsWrite};
use static_cell::make_static;

use crate::domain::entity::StatusState;

pub struct StatusLed<'a> {
    adapter: SmartLedsAdapter<'a, { buffer_size(1) }>,
}

impl<'a> StatusLed<'a> {
    pub fn new<O>(rmt: RMT<'a>, pin: O) -> Self
    where
        O: PeripheralOutput<'a>,
    {
        let rmt = Rmt::new(rmt, Rate::from_mhz(80)).unwrap();

        // Safety: a static buffer that lives for the entire program.
        let rmt_buffer = make_static!(smart_led_buffer!(1));
        let adapter = SmartLedsAdapter::new(rmt.channel0, pin, rmt_buffer);

        Self { adapter }
    }

    pub fn show(&mut self, state: StatusState) {
        let color = match state {
            StatusState::BootloaderStarted => RGB8 { r: 0, g: 0, b: 16 },
            StatusState::UsbMounted => RGB8 { r: 0, g: 16, b: 0 },
            StatusState::WritingStarted => RGB8 { r: 16, g: 8, b: 0 },
            StatusState::WritingFinished => RGB8 { r: 16, g: 16, b: 16 },
            StatusState::Restarting => RGB8 { r: 16, g: 0, b: 16 },
        };
        interrupt::free(|| {
            let _ = self.adapter.write([color].into_iter());
        });
    }
}

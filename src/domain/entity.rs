/// Device status shown on the board LED. Fire-and-forget side channel; the
/// host never sees any of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    BootloaderStarted,
    UsbMounted,
    WritingStarted,
    WritingFinished,
    Restarting,
}

/// Application boot slot selectable for the next reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSlot {
    Factory,
    Ota0,
}

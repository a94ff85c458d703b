//! Mass-storage callback surface.
//!
//! The USB/SCSI stack calls these functions synchronously, one command at a
//! time, from its own execution context; that path is the sole owner of the
//! disk instance, so flash I/O (including the multi-second full-partition
//! erase) runs without holding any lock. The completion watchdog only needs
//! a `(streaming, last_activity)` snapshot, which lives behind its own
//! briefly-held blocking mutex.

use core::cell::Cell;
use core::sync::atomic::{AtomicPtr, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use esp_println::println;
use esp_storage::FlashStorage;
use msc_ota_core::image::{BLOCK_SIZE, DISK_BLOCK_COUNT, DiskError};
use msc_ota_core::stream::{FlashStream, FlashTarget as _, WriteOutcome};
use static_cell::StaticCell;

use crate::domain::entity::StatusState;
use crate::domain::ports::ScsiSense;
use crate::infrastructure::drivers::OtaPartition;
use crate::infrastructure::tasks::{signal_status, watchdog};

const SCSI_CMD_PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;

type UsbDisk = FlashStream<OtaPartition>;

static USB_DISK_CELL: StaticCell<UsbDisk> = StaticCell::new();

/// Set once by [`init_msc`], then read by the SCSI callbacks.
static USB_DISK: AtomicPtr<UsbDisk> = AtomicPtr::new(core::ptr::null_mut());

/// Stream-state snapshot for the completion watchdog, updated after every
/// WRITE10. Kept apart from the disk so the callbacks never hold a critical
/// section across flash I/O.
static STREAM_ACTIVITY: Mutex<CriticalSectionRawMutex, Cell<(bool, u64)>> =
    Mutex::new(Cell::new((false, 0)));

fn with_disk<R>(f: impl FnOnce(&mut UsbDisk) -> R) -> Option<R> {
    let disk = USB_DISK.load(Ordering::Acquire);
    if disk.is_null() {
        return None;
    }
    // Safety: the SCSI callback path is the sole user of the disk after
    // init and never runs concurrently with itself (one command at a time).
    Some(f(unsafe { &mut *disk }))
}

/// Build the disk working copy and bind the `ota_0` partition.
///
/// On `Err` the caller must not publish the MSC interface; a missing
/// partition only degrades to a virtual-disk-without-update-target, which
/// still mounts.
pub fn init_msc(flash: *mut FlashStorage<'static>) -> Result<(), DiskError> {
    let partition = match OtaPartition::find(flash) {
        Ok(part) => {
            println!("msc: ota_0 partition found, {} bytes", part.size());
            Some(part)
        }
        Err(err) => {
            println!("msc: no ota_0 partition: {:?}", err);
            None
        }
    };

    let disk = USB_DISK_CELL.init(FlashStream::new(partition)?);
    USB_DISK.store(disk, Ordering::Release);
    Ok(())
}

/// SCSI INQUIRY identity: `(vendor[8], product[16], revision[4])`.
pub fn inquiry() -> ([u8; 8], [u8; 16], [u8; 4]) {
    (*b"ESP32S2 ", *b"OTA Mass Storage", *b"1.0 ")
}

/// SCSI TEST UNIT READY. The RAM disk is always ready.
pub fn test_unit_ready() -> bool {
    true
}

/// SCSI READ CAPACITY: `(block_count, block_size)`. The host polls this
/// while mounting, so it doubles as the "host attached" indicator.
pub fn capacity() -> (u32, u16) {
    signal_status(StatusState::UsbMounted);
    with_disk(|disk| disk.capacity()).unwrap_or((DISK_BLOCK_COUNT, BLOCK_SIZE as u16))
}

/// SCSI START STOP UNIT. Load/eject hooks are no-ops here.
pub fn start_stop(_power_condition: u8, _start: bool, _load_eject: bool) -> bool {
    true
}

/// SCSI READ10. Returns the number of bytes copied into `buf`.
pub fn read10(lba: u32, offset: u32, buf: &mut [u8]) -> usize {
    with_disk(|disk| disk.read(lba, offset, buf)).unwrap_or(0)
}

/// SCSI WRITE10. Returns the number of bytes accepted; the transport has no
/// way to report partial failure mid-stream, so failures are logged and the
/// full count is reported anyway.
pub fn write10(lba: u32, offset: u32, data: &[u8]) -> usize {
    let now_ms = Instant::now().as_millis();
    let Some((outcome, streaming)) = with_disk(|disk| {
        let outcome = disk.write(lba, offset, data, now_ms);
        (outcome, disk.is_streaming())
    }) else {
        return 0;
    };

    let (was_streaming, _) = STREAM_ACTIVITY.lock(|state| state.replace((streaming, now_ms)));
    if streaming && !was_streaming {
        println!("msc: firmware stream detected at lba {}", lba);
        signal_status(StatusState::WritingStarted);
        watchdog::arm();
    }

    match outcome {
        WriteOutcome::EraseFailed(_) => {
            println!("msc: partition erase failed, update aborted");
        }
        WriteOutcome::FlashWriteFailed(_) => {
            println!("msc: flash write failed at lba {}", lba);
        }
        WriteOutcome::DiskWrite(_)
        | WriteOutcome::StreamStarted(_)
        | WriteOutcome::StreamData(_)
        | WriteOutcome::StaleIgnored(_) => {}
    }
    outcome.accepted()
}

/// Commands without a dedicated callback. PREVENT ALLOW MEDIUM REMOVAL is a
/// silent no-op; anything else is rejected with an illegal-request sense.
pub fn scsi_other(_lun: u8, command: &[u8], _buf: &mut [u8]) -> Result<usize, ScsiSense> {
    match command.first().copied() {
        Some(SCSI_CMD_PREVENT_ALLOW_MEDIUM_REMOVAL) => Ok(0),
        _ => Err(ScsiSense::ILLEGAL_REQUEST),
    }
}

/// Snapshot of `(streaming, last_activity_ms)` for the watchdog poll.
pub(crate) fn stream_activity() -> (bool, u64) {
    STREAM_ACTIVITY.lock(Cell::get)
}

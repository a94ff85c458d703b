//! Update-target partition driver.
//!
//! The `ota_0` entry is resolved from the partition table once at startup;
//! after that, reads and writes go straight to flash at the cached base
//! offset. Flash is owned by the MSC service path; this driver uses a raw
//! pointer (single-owner assumption) to perform synchronous flash
//! operations.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use esp_bootloader_esp_idf::partitions::{
    AppPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_storage::FlashStorage;
use msc_ota_core::stream::{FlashError, FlashTarget};

use crate::domain::ports::FirmwareError;

/// Handle to the `ota_0` partition. Offsets passed to [`FlashTarget`] are
/// relative to the partition start and bounds-checked against its size.
pub struct OtaPartition {
    flash: *mut FlashStorage<'static>,
    base: u32,
    size: u32,
}

// Safety: the SCSI callback path is the sole user of this handle and never
// runs concurrently with itself. The raw pointer is not shared elsewhere
// while an operation is in flight.
unsafe impl Send for OtaPartition {}

impl OtaPartition {
    /// Locate `ota_0` in the partition table and cache its extent.
    pub fn find(flash: *mut FlashStorage<'static>) -> Result<Self, FirmwareError> {
        // Safety: single owner, see the type-level note.
        let flash_ref = unsafe { &mut *flash };
        let mut part_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
        let pt = read_partition_table(flash_ref, &mut part_buffer)
            .map_err(|_| FirmwareError::InvalidPartitionTable)?;
        let entry = pt
            .find_partition(PartitionType::App(AppPartitionSubType::Ota0))
            .map_err(|_| FirmwareError::InvalidPartitionTable)?
            .ok_or(FirmwareError::PartitionNotFound)?;

        let base = entry.offset();
        #[allow(clippy::cast_possible_truncation)]
        let size = entry.as_embedded_storage(flash_ref).capacity() as u32;
        Ok(Self { flash, base, size })
    }

    fn out_of_bounds(&self, offset: u32, len: usize) -> bool {
        u64::from(offset) + len as u64 > u64::from(self.size)
    }
}

impl FlashTarget for OtaPartition {
    fn size(&self) -> u32 {
        self.size
    }

    fn erase_all(&mut self) -> Result<(), FlashError> {
        // Safety: single owner, see the type-level note.
        let flash = unsafe { &mut *self.flash };
        flash
            .erase(self.base, self.base + self.size)
            .map_err(|_| FlashError::Erase)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.out_of_bounds(offset, data.len()) {
            return Err(FlashError::Write);
        }
        // Safety: single owner, see the type-level note.
        let flash = unsafe { &mut *self.flash };
        flash
            .write(self.base + offset, data)
            .map_err(|_| FlashError::Write)
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if self.out_of_bounds(offset, buf.len()) {
            return Err(FlashError::Read);
        }
        // Safety: single owner, see the type-level note.
        let flash = unsafe { &mut *self.flash };
        flash
            .read(self.base + offset, buf)
            .map_err(|_| FlashError::Read)
    }
}

//! Boot-target selection via the esp-idf OTA data partition.

use esp_bootloader_esp_idf::{
    ota::Ota,
    partitions::{
        AppPartitionSubType, DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType,
        read_partition_table,
    },
};
use esp_storage::FlashStorage;

use crate::domain::{entity::BootSlot, ports::FirmwareError};

impl From<BootSlot> for AppPartitionSubType {
    fn from(slot: BootSlot) -> Self {
        match slot {
            BootSlot::Factory => AppPartitionSubType::Factory,
            BootSlot::Ota0 => AppPartitionSubType::Ota0,
        }
    }
}

impl From<AppPartitionSubType> for BootSlot {
    fn from(sub_type: AppPartitionSubType) -> Self {
        match sub_type {
            AppPartitionSubType::Ota0 => BootSlot::Ota0,
            _ => BootSlot::Factory,
        }
    }
}

pub struct BootManager {
    flash: *mut FlashStorage<'static>,
}

// Safety: only the completion watchdog task holds a BootManager; the raw
// pointer is never used concurrently from another task.
unsafe impl Send for BootManager {}

impl BootManager {
    pub fn new(flash: *mut FlashStorage<'static>) -> Self {
        Self { flash }
    }

    fn with_ota<R>(
        &mut self,
        f: impl FnOnce(Ota<'_, FlashStorage<'static>>) -> R,
    ) -> Result<R, FirmwareError> {
        // Safety: single owner, see the Send note.
        let flash_ref = unsafe { &mut *self.flash };
        let mut part_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
        let pt = read_partition_table(flash_ref, &mut part_buffer)
            .map_err(|_| FirmwareError::InvalidPartitionTable)?;
        let ota_part = pt
            .find_partition(PartitionType::Data(DataPartitionSubType::Ota))
            .map_err(|_| FirmwareError::InvalidPartitionTable)?
            .ok_or(FirmwareError::PartitionNotFound)?;
        let mut ota_part = ota_part.as_embedded_storage(flash_ref);
        let ota =
            Ota::new(&mut ota_part, 2).map_err(|_| FirmwareError::InvalidPartitionTable)?;
        Ok(f(ota))
    }

    /// Persist `ota_0` as the boot target for the next reset.
    pub fn commit_update(&mut self) -> Result<(), FirmwareError> {
        self.with_ota(|mut ota| {
            ota.set_current_app_partition(BootSlot::Ota0.into())
                .map_err(|_| FirmwareError::Commit)
        })?
    }

    /// Slot the bootloader chose for the running image.
    pub fn current_slot(&mut self) -> Result<BootSlot, FirmwareError> {
        self.with_ota(|mut ota| {
            ota.current_app_partition()
                .map_err(|_| FirmwareError::InvalidPartitionTable)
        })?
        .map(BootSlot::from)
    }
}

//! Synthetic FAT12 volume served to the host.
//!
//! The template is the minimum a host OS needs to mount the disk and copy a
//! single file onto it: boot sector, one FAT, a root directory carrying the
//! volume label and a README entry, and the README contents at cluster 2.

use alloc::vec::Vec;
use core::ops::Range;

/// Block (sector) size reported to the host.
pub const BLOCK_SIZE: usize = 512;

/// Virtual disk size in blocks. 8 KiB is the smallest disk Windows will
/// mount; this stays comfortably above that.
pub const DISK_BLOCK_COUNT: u32 = 100;

/// Blocks `[0, RAM_REGION_BLOCKS)` are served from the RAM working copy;
/// everything above maps onto the OTA partition.
pub const RAM_REGION_BLOCKS: u32 = 50;

/// Boot-sector offset of the little-endian 16-bit total-sector count.
/// Patched at initialization so the host sees a disk large enough to hold a
/// firmware image.
pub const CAPACITY_FIELD_OFFSET: usize = 19;

const VOLUME_LABEL: &[u8; 11] = b"ESP MSC OTA";

pub const README_CONTENTS: &[u8] = b"USB mass-storage OTA updater.\r\n\r\n\
Drop a firmware binary onto this drive to reflash the device.\r\n\
The device reboots into the new image once the copy goes quiet.\r\n";

const fn put(buf: &mut [u8; BLOCK_SIZE], at: usize, bytes: &[u8]) {
    let mut i = 0;
    while i < bytes.len() {
        buf[at + i] = bytes[i];
        i += 1;
    }
}

/// Block 0: boot sector. 512-byte sectors, one reserved sector, one FAT of
/// one sector, 16 root entries, media type 0xF8.
const BOOT_SECTOR: [u8; BLOCK_SIZE] = {
    let mut s = [0u8; BLOCK_SIZE];
    put(&mut s, 0, &[0xEB, 0x3C, 0x90]); // jump
    put(&mut s, 3, b"MSDOS5.0"); // OEM name
    put(&mut s, 11, &[0x00, 0x02]); // bytes per sector
    put(&mut s, 13, &[0x10]); // sectors per cluster
    put(&mut s, 14, &[0x01, 0x00]); // reserved sectors
    put(&mut s, 16, &[0x01]); // FAT count
    put(&mut s, 17, &[0x10, 0x00]); // root entries
    put(&mut s, 19, &[0x10, 0x00]); // total sectors, patched at init
    put(&mut s, 21, &[0xF8]); // media type
    put(&mut s, 22, &[0x01, 0x00]); // sectors per FAT
    put(&mut s, 24, &[0x01, 0x00]); // sectors per track
    put(&mut s, 26, &[0x01, 0x00]); // heads
    put(&mut s, 36, &[0x80, 0x00, 0x29]); // drive number, extended boot signature
    put(&mut s, 39, &[0x34, 0x12, 0x56, 0x78]); // volume serial
    put(&mut s, 43, VOLUME_LABEL);
    put(&mut s, 54, b"FAT12   ");
    put(&mut s, 510, &[0x55, 0xAA]);
    s
};

/// Block 1: FAT. Entries 0/1 are the media reserve, entry 2 marks the
/// README's single cluster as end-of-chain.
const FAT_TABLE: [u8; BLOCK_SIZE] = {
    let mut s = [0u8; BLOCK_SIZE];
    put(&mut s, 0, &[0xF8, 0xFF, 0xFF, 0xFF, 0x0F]);
    s
};

/// Block 2: root directory, volume label entry plus the README entry
/// pointing at cluster 2.
const ROOT_DIRECTORY: [u8; BLOCK_SIZE] = {
    let mut s = [0u8; BLOCK_SIZE];
    put(&mut s, 0, VOLUME_LABEL);
    put(&mut s, 11, &[0x08]); // volume-label attribute
    put(&mut s, 22, &[0x4F, 0x6D, 0x65, 0x43]); // write time/date

    put(&mut s, 32, b"README  TXT");
    put(&mut s, 43, &[0x20]); // archive attribute
    put(&mut s, 44, &[0x00, 0xC6, 0x52, 0x6D]); // creation time
    put(&mut s, 48, &[0x65, 0x43, 0x65, 0x43, 0x00, 0x00]); // dates, cluster high
    put(&mut s, 54, &[0x88, 0x6D, 0x65, 0x43]); // write time/date
    put(&mut s, 58, &[0x02, 0x00]); // first cluster
    put(&mut s, 60, &(README_CONTENTS.len() as u32).to_le_bytes());
    s
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The working disk buffer could not be allocated.
    Allocation,
}

/// Mutable working copy of the virtual disk.
///
/// Allocated once at startup and kept for the process lifetime. Host
/// filesystem writes that are not firmware payload (FAT and directory
/// updates) land here.
pub struct DiskImage {
    data: Vec<u8>,
}

impl DiskImage {
    /// Build the working copy. When the OTA partition size is known, the
    /// reported total-sector count is patched to `size / BLOCK_SIZE`.
    pub fn new(partition_size: Option<u32>) -> Result<Self, DiskError> {
        let len = BLOCK_SIZE * DISK_BLOCK_COUNT as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| DiskError::Allocation)?;
        data.resize(len, 0);

        data[..BLOCK_SIZE].copy_from_slice(&BOOT_SECTOR);
        data[BLOCK_SIZE..2 * BLOCK_SIZE].copy_from_slice(&FAT_TABLE);
        data[2 * BLOCK_SIZE..3 * BLOCK_SIZE].copy_from_slice(&ROOT_DIRECTORY);
        data[3 * BLOCK_SIZE..3 * BLOCK_SIZE + README_CONTENTS.len()]
            .copy_from_slice(README_CONTENTS);

        if let Some(size) = partition_size {
            #[allow(clippy::cast_possible_truncation)]
            let blocks = (size / BLOCK_SIZE as u32) as u16;
            data[CAPACITY_FIELD_OFFSET..CAPACITY_FIELD_OFFSET + 2]
                .copy_from_slice(&blocks.to_le_bytes());
        }

        Ok(Self { data })
    }

    /// Copy `buf.len()` bytes out of the disk buffer. Out-of-range requests
    /// read zero bytes.
    pub fn read(&self, lba: u32, offset: u32, buf: &mut [u8]) -> usize {
        match self.range(lba, offset, buf.len()) {
            Some(range) => {
                buf.copy_from_slice(&self.data[range]);
                buf.len()
            }
            None => 0,
        }
    }

    /// Copy `data` into the disk buffer. Out-of-range requests write zero
    /// bytes.
    pub fn write(&mut self, lba: u32, offset: u32, data: &[u8]) -> usize {
        match self.range(lba, offset, data.len()) {
            Some(range) => {
                self.data[range].copy_from_slice(data);
                data.len()
            }
            None => 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, lba: u32, offset: u32, len: usize) -> Option<Range<usize>> {
        let start = (lba as usize)
            .checked_mul(BLOCK_SIZE)?
            .checked_add(offset as usize)?;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

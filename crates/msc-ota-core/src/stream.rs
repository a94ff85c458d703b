//! Flash-streaming state machine behind READ10/WRITE10.
//!
//! The host sees an ordinary disk. As soon as a written block starts with
//! the executable-image magic byte, the write stream is redirected from the
//! RAM disk buffer to the OTA partition: the partition is erased once, then
//! every in-range block is appended at a monotonically advancing cursor.
//! Host filesystem bookkeeping that trails the copy (FAT and directory
//! flushes at lower addresses) is filtered out by the start-block check.

use crate::image::{BLOCK_SIZE, DISK_BLOCK_COUNT, DiskError, DiskImage, RAM_REGION_BLOCKS};

/// First byte of an ESP application image.
pub const IMAGE_MAGIC: u8 = 0xE9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    Erase,
    Write,
    Read,
}

/// Erasable, byte-writable flash region designated as the update target.
pub trait FlashTarget {
    /// Partition size in bytes.
    fn size(&self) -> u32;

    /// Erase the full partition extent. Must precede any write.
    fn erase_all(&mut self) -> Result<(), FlashError>;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

/// What a WRITE10 call did. Every variant carries the byte count reported
/// to the host; the transport has no channel for partial failure, so the
/// count equals the request length even for the failure variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Ordinary virtual-disk mutation (host filesystem metadata).
    DiskWrite(usize),
    /// This call detected the image magic, erased the partition and flashed
    /// the first chunk.
    StreamStarted(usize),
    /// In-range payload flashed at the cursor.
    StreamData(usize),
    /// Stale write below the stream start block, dropped.
    StaleIgnored(usize),
    /// Image magic seen but the partition erase failed; the mode transition
    /// was aborted and the block went to the disk buffer instead.
    EraseFailed(usize),
    /// Partition write failed while streaming. Takes precedence over
    /// `StreamStarted` when the triggering chunk itself is lost. Best
    /// effort: the cursor still advances and the count is still reported.
    FlashWriteFailed(usize),
}

impl WriteOutcome {
    /// Byte count reported to the host.
    pub fn accepted(self) -> usize {
        match self {
            Self::DiskWrite(n)
            | Self::StreamStarted(n)
            | Self::StreamData(n)
            | Self::StaleIgnored(n)
            | Self::EraseFailed(n)
            | Self::FlashWriteFailed(n) => n,
        }
    }
}

/// Byte offset into the partition for a block address above the RAM region.
/// The partition's first byte appears one block below the first partition
/// LBA, i.e. LBA 50 maps to byte 49 * 512.
fn partition_offset(lba: u32, offset: u32) -> Option<u32> {
    let byte = u64::from(lba) * BLOCK_SIZE as u64 + u64::from(offset);
    let byte = byte.checked_sub(BLOCK_SIZE as u64)?;
    u32::try_from(byte).ok()
}

/// Virtual disk plus firmware-stream state. One instance per boot cycle;
/// `active` transitions false to true at most once.
pub struct FlashStream<P: FlashTarget> {
    disk: DiskImage,
    partition: Option<P>,
    active: bool,
    start_block: u32,
    write_cursor: u32,
    last_activity_ms: u64,
}

impl<P: FlashTarget> FlashStream<P> {
    /// Build the disk working copy and bind the update target. With no
    /// partition the disk still mounts but writes can never enter flash
    /// mode.
    pub fn new(partition: Option<P>) -> Result<Self, DiskError> {
        let disk = DiskImage::new(partition.as_ref().map(FlashTarget::size))?;
        Ok(Self {
            disk,
            partition,
            active: false,
            start_block: 0,
            write_cursor: 0,
            last_activity_ms: 0,
        })
    }

    /// Reported disk geometry: `(block_count, block_size)`. Idempotent.
    #[allow(clippy::cast_possible_truncation)]
    pub fn capacity(&self) -> (u32, u16) {
        match &self.partition {
            Some(part) => (part.size() / BLOCK_SIZE as u32, BLOCK_SIZE as u16),
            None => (DISK_BLOCK_COUNT, BLOCK_SIZE as u16),
        }
    }

    /// Serve READ10: the RAM region (and everything while no partition is
    /// bound) comes from the disk buffer, the rest from the partition.
    /// Out-of-range requests read zero bytes.
    pub fn read(&mut self, lba: u32, offset: u32, buf: &mut [u8]) -> usize {
        match self.partition.as_mut() {
            Some(part) if lba >= RAM_REGION_BLOCKS => {
                let Some(addr) = partition_offset(lba, offset) else {
                    return 0;
                };
                if u64::from(addr) + buf.len() as u64 > u64::from(part.size()) {
                    return 0;
                }
                match part.read(addr, buf) {
                    Ok(()) => buf.len(),
                    Err(_) => 0,
                }
            }
            _ => self.disk.read(lba, offset, buf),
        }
    }

    /// Serve WRITE10. See the module docs for the dispatch rules; every
    /// call, whatever its outcome, refreshes the activity timestamp the
    /// completion watchdog polls.
    pub fn write(&mut self, lba: u32, offset: u32, data: &[u8], now_ms: u64) -> WriteOutcome {
        self.last_activity_ms = now_ms;
        let len = data.len();

        // The magic check runs on every write until the switch happens;
        // once active it is never re-entered, so a coincidental 0xE9 in a
        // later FAT or directory block cannot retrigger the erase.
        let mut started = false;
        if !self.active && data.first() == Some(&IMAGE_MAGIC) {
            if let Some(part) = self.partition.as_mut() {
                if part.erase_all().is_err() {
                    // Abort the transition entirely: no partially-erased
                    // target behind an active stream.
                    self.disk.write(lba, offset, data);
                    return WriteOutcome::EraseFailed(len);
                }
                self.active = true;
                self.start_block = lba;
                self.write_cursor = 0;
                started = true;
            }
        }

        if !self.active {
            self.disk.write(lba, offset, data);
            return WriteOutcome::DiskWrite(len);
        }

        if lba < self.start_block {
            // Host FAT bookkeeping trailing the data stream; accept the
            // bytes but keep them away from the partition.
            return WriteOutcome::StaleIgnored(len);
        }

        let result = match self.partition.as_mut() {
            Some(part) => part.write(self.write_cursor, data),
            None => Err(FlashError::Write),
        };
        #[allow(clippy::cast_possible_truncation)]
        {
            self.write_cursor += len as u32;
        }

        if result.is_err() {
            WriteOutcome::FlashWriteFailed(len)
        } else if started {
            WriteOutcome::StreamStarted(len)
        } else {
            WriteOutcome::StreamData(len)
        }
    }

    /// Whether a firmware stream has been detected this boot cycle.
    pub fn is_streaming(&self) -> bool {
        self.active
    }

    /// Timestamp of the last accepted write, in caller milliseconds.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Next partition byte offset to be written.
    pub fn write_cursor(&self) -> u32 {
        self.write_cursor
    }

    /// Block address the firmware stream began at.
    pub fn start_block(&self) -> u32 {
        self.start_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    const PART_BLOCKS: usize = 64;

    struct FakePartition {
        data: Vec<u8>,
        erases: u32,
        writes: Vec<(u32, usize)>,
        fail_erase: bool,
        fail_write: bool,
    }

    impl FakePartition {
        fn new() -> Self {
            Self {
                data: vec![0xFF; PART_BLOCKS * BLOCK_SIZE],
                erases: 0,
                writes: Vec::new(),
                fail_erase: false,
                fail_write: false,
            }
        }
    }

    impl FlashTarget for FakePartition {
        fn size(&self) -> u32 {
            self.data.len() as u32
        }

        fn erase_all(&mut self) -> Result<(), FlashError> {
            if self.fail_erase {
                return Err(FlashError::Erase);
            }
            self.erases += 1;
            self.data.fill(0xFF);
            Ok(())
        }

        fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
            if self.fail_write {
                return Err(FlashError::Write);
            }
            let start = offset as usize;
            self.data[start..start + data.len()].copy_from_slice(data);
            self.writes.push((offset, data.len()));
            Ok(())
        }

        fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
            let start = offset as usize;
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            Ok(())
        }
    }

    fn stream() -> FlashStream<FakePartition> {
        FlashStream::new(Some(FakePartition::new())).unwrap()
    }

    fn block(first: u8) -> Vec<u8> {
        let mut b = vec![0u8; BLOCK_SIZE];
        b[0] = first;
        b
    }

    #[test]
    fn capacity_reports_partition_geometry() {
        let s = stream();
        assert_eq!(s.capacity(), (PART_BLOCKS as u32, 512));
        // Idempotent: no state changes between calls.
        assert_eq!(s.capacity(), s.capacity());

        let unbound: FlashStream<FakePartition> = FlashStream::new(None).unwrap();
        assert_eq!(unbound.capacity(), (DISK_BLOCK_COUNT, 512));
    }

    #[test]
    fn low_range_reads_match_disk_buffer() {
        let mut s = stream();
        let reference = DiskImage::new(Some((PART_BLOCKS * BLOCK_SIZE) as u32)).unwrap();

        for (lba, offset, len) in [(0, 0, 512), (1, 0, 16), (2, 32, 64), (3, 0, 200), (49, 100, 12)]
        {
            let mut got = vec![0u8; len];
            assert_eq!(s.read(lba, offset, &mut got), len);
            let mut want = vec![0u8; len];
            assert_eq!(reference.read(lba, offset, &mut want), len);
            assert_eq!(got, want, "lba {lba} offset {offset}");
        }
    }

    #[test]
    fn high_range_reads_come_from_partition() {
        let mut s = stream();
        s.partition.as_mut().unwrap().data[49 * BLOCK_SIZE] = 0xAB;

        let mut buf = [0u8; 4];
        assert_eq!(s.read(50, 0, &mut buf), 4);
        assert_eq!(buf[0], 0xAB);

        // Past the partition end: fail closed.
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(s.read(PART_BLOCKS as u32 + 1, 0, &mut buf), 0);
    }

    #[test]
    fn plain_write_stays_on_the_disk() {
        let mut s = stream();
        let data = block(0x00);
        assert_eq!(s.write(10, 0, &data, 5), WriteOutcome::DiskWrite(512));
        assert!(!s.is_streaming());
        assert_eq!(s.last_activity_ms(), 5);
        assert_eq!(s.partition.as_ref().unwrap().erases, 0);

        let mut back = vec![0u8; BLOCK_SIZE];
        assert_eq!(s.read(10, 0, &mut back), 512);
        assert_eq!(back, data);
    }

    #[test]
    fn magic_write_starts_the_stream() {
        let mut s = stream();
        let data = block(IMAGE_MAGIC);
        assert_eq!(s.write(50, 0, &data, 100), WriteOutcome::StreamStarted(512));

        assert!(s.is_streaming());
        assert_eq!(s.start_block(), 50);
        let part = s.partition.as_ref().unwrap();
        assert_eq!(part.erases, 1);
        // The triggering chunk itself is the image head, flashed at offset 0.
        assert_eq!(part.writes, vec![(0, 512)]);
        assert_eq!(s.write_cursor(), 512);
    }

    #[test]
    fn detection_fires_at_most_once() {
        let mut s = stream();
        s.write(50, 0, &block(IMAGE_MAGIC), 0);
        let cursor = s.write_cursor();

        // A later payload block that happens to start with 0xE9 must not
        // re-erase or reset the cursor.
        assert_eq!(
            s.write(51, 0, &block(IMAGE_MAGIC), 10),
            WriteOutcome::StreamData(512)
        );
        assert_eq!(s.partition.as_ref().unwrap().erases, 1);
        assert_eq!(s.start_block(), 50);
        assert_eq!(s.write_cursor(), cursor + 512);
    }

    #[test]
    fn stale_writes_are_dropped_but_acknowledged() {
        let mut s = stream();
        s.write(50, 0, &block(IMAGE_MAGIC), 0);
        let cursor = s.write_cursor();
        let flashed = s.partition.as_ref().unwrap().writes.len();

        assert_eq!(
            s.write(49, 0, &block(0x12), 20),
            WriteOutcome::StaleIgnored(512)
        );
        assert_eq!(s.write_cursor(), cursor);
        assert_eq!(s.partition.as_ref().unwrap().writes.len(), flashed);
        // Still counts as activity for the watchdog.
        assert_eq!(s.last_activity_ms(), 20);
    }

    #[test]
    fn cursor_is_the_prefix_sum_of_accepted_writes() {
        let mut s = stream();
        s.write(50, 0, &block(IMAGE_MAGIC), 0);

        let lengths = [512usize, 128, 512, 64];
        let mut expected = 512u32;
        for (i, len) in lengths.into_iter().enumerate() {
            let data = vec![0x5A; len];
            assert_eq!(
                s.write(51 + i as u32, 0, &data, 0),
                WriteOutcome::StreamData(len)
            );
            // Each write lands at the cumulative offset before it.
            assert_eq!(
                s.partition.as_ref().unwrap().writes.last(),
                Some(&(expected, len))
            );
            expected += len as u32;
            assert_eq!(s.write_cursor(), expected);
        }
    }

    #[test]
    fn erase_failure_aborts_the_transition() {
        let mut s = stream();
        s.partition.as_mut().unwrap().fail_erase = true;

        assert_eq!(
            s.write(50, 0, &block(IMAGE_MAGIC), 0),
            WriteOutcome::EraseFailed(512)
        );
        assert!(!s.is_streaming());
        assert_eq!(s.partition.as_ref().unwrap().erases, 0);

        // The check re-fires on the next magic write once the fault clears.
        s.partition.as_mut().unwrap().fail_erase = false;
        assert_eq!(
            s.write(50, 0, &block(IMAGE_MAGIC), 1),
            WriteOutcome::StreamStarted(512)
        );
        assert!(s.is_streaming());
    }

    #[test]
    fn flash_write_failure_is_best_effort() {
        let mut s = stream();
        s.write(50, 0, &block(IMAGE_MAGIC), 0);
        let cursor = s.write_cursor();

        s.partition.as_mut().unwrap().fail_write = true;
        assert_eq!(
            s.write(51, 0, &block(0x01), 0),
            WriteOutcome::FlashWriteFailed(512)
        );
        // Source parity: the cursor advances and the count is reported even
        // though the bytes never reached flash.
        assert_eq!(s.write_cursor(), cursor + 512);
    }

    #[test]
    fn failed_trigger_write_still_reports_the_failure() {
        // The erase succeeds but flashing the image head fails: the stream
        // must come up anyway, and the lost chunk must be visible to the
        // caller instead of hiding behind the started outcome.
        let mut s = stream();
        s.partition.as_mut().unwrap().fail_write = true;

        assert_eq!(
            s.write(50, 0, &block(IMAGE_MAGIC), 0),
            WriteOutcome::FlashWriteFailed(512)
        );
        assert!(s.is_streaming());
        assert_eq!(s.start_block(), 50);
        assert_eq!(s.partition.as_ref().unwrap().erases, 1);
        assert_eq!(s.write_cursor(), 512);
    }

    #[test]
    fn unbound_partition_never_streams() {
        let mut s: FlashStream<FakePartition> = FlashStream::new(None).unwrap();
        assert_eq!(
            s.write(50, 0, &block(IMAGE_MAGIC), 0),
            WriteOutcome::DiskWrite(512)
        );
        assert!(!s.is_streaming());
    }

    #[test]
    fn streamed_image_lands_contiguously() {
        // Drag-and-drop shape: image blocks interleaved with a trailing FAT
        // flush at a low address.
        let mut s = stream();
        let head = block(IMAGE_MAGIC);
        let mid = block(0x11);
        let tail = block(0x22);

        s.write(50, 0, &head, 0);
        s.write(51, 0, &mid, 1);
        s.write(1, 0, &block(0xF8), 2); // FAT flush, stale
        s.write(52, 0, &tail, 3);

        let part = s.partition.as_mut().unwrap();
        let mut flashed = vec![0u8; 3 * BLOCK_SIZE];
        part.read(0, &mut flashed).unwrap();
        assert_eq!(&flashed[..BLOCK_SIZE], &head[..]);
        assert_eq!(&flashed[BLOCK_SIZE..2 * BLOCK_SIZE], &mid[..]);
        assert_eq!(&flashed[2 * BLOCK_SIZE..], &tail[..]);
        assert_eq!(s.write_cursor(), 3 * BLOCK_SIZE as u32);
    }
}

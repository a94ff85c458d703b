/// Error type for partition and boot-target operations.
#[derive(Debug)]
pub enum FirmwareError {
    PartitionNotFound,
    InvalidPartitionTable,
    Commit,
}

/// SCSI sense data reported for rejected commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiSense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl ScsiSense {
    /// Invalid command operation code.
    pub const ILLEGAL_REQUEST: Self = Self {
        key: 0x05,
        asc: 0x20,
        ascq: 0x00,
    };
}

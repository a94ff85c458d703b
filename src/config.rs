//! Tunable constants. The timeout values are heuristics, not protocol
//! requirements.

/// Write-silence window after which the firmware stream is treated as
/// complete, in milliseconds.
pub const STREAM_IDLE_TIMEOUT_MS: u64 = 1000;

/// Completion watchdog poll granularity, in milliseconds.
pub const WATCHDOG_POLL_MS: u64 = 100;

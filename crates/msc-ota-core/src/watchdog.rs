//! Completion detection for the firmware stream.
//!
//! MSC WRITE10 has no end-of-transfer marker, so completion is inferred
//! from write silence: once the stream is armed, a fixed idle window with
//! no accepted writes means the copy finished. The clock is injected as
//! plain milliseconds so the decision is testable without real delays; the
//! async poll loop lives in the firmware.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// No firmware stream detected yet.
    Idle,
    /// Stream in progress, writes still arriving.
    Waiting,
    /// Idle window elapsed; finalize the update.
    Complete,
}

/// Dead-man's-switch over the stream's activity timestamp.
pub struct CompletionWatchdog {
    idle_timeout_ms: u64,
}

impl CompletionWatchdog {
    pub const fn new(idle_timeout_ms: u64) -> Self {
        Self { idle_timeout_ms }
    }

    pub fn evaluate(&self, armed: bool, last_activity_ms: u64, now_ms: u64) -> WatchdogVerdict {
        if !armed {
            return WatchdogVerdict::Idle;
        }
        if now_ms.saturating_sub(last_activity_ms) > self.idle_timeout_ms {
            WatchdogVerdict::Complete
        } else {
            WatchdogVerdict::Waiting
        }
    }
}

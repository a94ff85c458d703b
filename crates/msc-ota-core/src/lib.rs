//! Platform-independent core of the MSC OTA disk: the synthetic FAT12
//! volume, the flash-streaming state machine behind WRITE10, and the
//! completion-watchdog timing decision.
//!
//! Nothing in here touches hardware; timestamps are plain milliseconds
//! injected by the caller, flash access goes through [`stream::FlashTarget`].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod image;
pub mod stream;
pub mod watchdog;

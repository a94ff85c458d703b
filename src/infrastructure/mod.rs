//! Infrastructure layer - hardware-facing implementations.

pub mod drivers;
pub mod repositories;
pub mod services;
pub mod tasks;

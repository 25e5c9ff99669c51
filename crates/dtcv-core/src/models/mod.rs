//! Shared data models for DTC display verification

mod dtc;
mod frame;
mod recognition;

pub use dtc::*;
pub use frame::*;
pub use recognition::*;

//! Acquisition session
//!
//! The [`AcquisitionScheduler`] owns the session state machine and the CAN
//! transport. In listen mode it reacts to DM1 frames on the bus; in send
//! mode the [`DtcSequencer`] drives it entry by entry.

mod error;
mod events;
mod scheduler;
mod sequencer;
mod state;
mod timer;

pub use error::SchedulerError;
pub use events::{SchedulerEvent, StopReason};
pub use scheduler::AcquisitionScheduler;
pub use sequencer::{DtcSequencer, COUNTDOWN_MILESTONES};
pub use state::{AcquisitionSession, Mode, SchedulerState, SessionSnapshot};
pub use timer::SettleTimer;

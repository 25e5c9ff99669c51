//! Scheduler events broadcast to observers

use dtcv_core::{CanFrame, DtcEntry, FailureRecord, RecognitionResult, RunStatus};
use serde::Serialize;

use super::Mode;

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    Completed,
    TransportFailure(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::Completed => write!(f, "sequence completed"),
            StopReason::TransportFailure(e) => write!(f, "transport failure: {}", e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Started {
        mode: Mode,
        generation: u64,
    },
    /// A new DM1 armed the settle timer
    Triggered {
        source_address: u8,
        payload: String,
    },
    Countdown {
        index: usize,
        remaining_units: u32,
    },
    AcquisitionFailed {
        index: Option<usize>,
        reason: String,
    },
    /// FF99 response transmitted in listen mode
    ResponseSent {
        counter: u64,
        frame: CanFrame,
        result: RecognitionResult,
    },
    Verified {
        index: usize,
        matched: bool,
        failure: Option<FailureRecord>,
    },
    EntryStarted {
        index: usize,
        total: usize,
        entry: DtcEntry,
    },
    EntryTimedOut {
        index: usize,
    },
    SequenceCompleted {
        status: RunStatus,
        passed: usize,
        total: usize,
    },
    Stopped {
        reason: StopReason,
    },
}

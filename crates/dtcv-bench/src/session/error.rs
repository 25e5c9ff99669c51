//! Scheduler error types

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the acquisition scheduler and the DTC sequencer
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error("session already running")]
    AlreadyRunning,

    #[error("session not running")]
    NotRunning,

    #[error("no entries to run")]
    EmptyEntrySet,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

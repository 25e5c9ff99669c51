//! dtcv-bench - CAN bench runtime for DTC display verification
//!
//! Drives an instrument cluster over CAN and reads its display back:
//!
//! ```text
//!   DtcSequencer ──► AcquisitionScheduler ──► CanTransport (SocketCAN / mock)
//!                         │
//!                         ├── SettleTimer
//!                         └── AcquisitionPipeline ──► ImageSource + TextRecognizer
//!                                   │
//!                                   └── dtcv-core (validate, verify, codec)
//! ```
//!
//! - listen mode: answer DM1 frames from another node with FF99 readings
//! - send mode: transmit each expected DTC and verify what the cluster shows
//! - manual DTC send and ASC trace replay for bench bring-up

pub mod acquisition;
pub mod config;
pub mod manual;
pub mod session;
pub mod trace;
pub mod transport;

pub use acquisition::{
    Acquisition, AcquisitionError, AcquisitionPipeline, ImageSource, ScriptedDisplay,
    ScriptedReading, TextRecognizer,
};
pub use config::{BenchConfig, ConfigError};
pub use manual::{build_manual_frame, send_manual, ManualSendError, Repeat};
pub use session::{
    AcquisitionScheduler, DtcSequencer, Mode, SchedulerError, SchedulerEvent, SchedulerState,
    SessionSnapshot, StopReason,
};
pub use trace::{load_asc, parse_asc, AscTrace, PlaybackSummary, TracePlayer};
pub use transport::{create_transport, CanTransport, MockCanTransport, TransportError};

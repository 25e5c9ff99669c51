//! Display acquisition
//!
//! An acquisition captures one frame of the cluster display, reads the SPN
//! and FMI text regions through a [`TextRecognizer`], and measures the two
//! lamp regions. Camera and recognizer engines plug in behind the traits
//! below; [`scripted`] provides in-process implementations for tests and
//! offline rehearsal.

mod pipeline;
pub mod scripted;

pub use pipeline::{Acquisition, AcquisitionPipeline};
pub use scripted::{ScriptedDisplay, ScriptedReading};

use dtcv_core::{Candidate, PixelBuffer, Region};
use thiserror::Error;

/// Errors that abort one acquisition cycle
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AcquisitionError {
    #[error("no frame available: {0}")]
    NoFrame(String),

    #[error("{field} region {region:?} lies outside the {width}x{height} frame")]
    RegionOutOfFrame {
        field: &'static str,
        region: Region,
        width: u32,
        height: u32,
    },

    #[error("recognizer failed: {0}")]
    Recognizer(String),

    #[error("acquisition worker failed: {0}")]
    Worker(String),
}

/// Source of display frames (camera, capture card, file replay)
pub trait ImageSource: Send + Sync {
    /// Capture the current frame. The returned buffer is owned by the caller.
    fn capture(&self) -> Result<PixelBuffer, AcquisitionError>;
}

/// Text recognition engine for a cropped display region
pub trait TextRecognizer: Send + Sync {
    /// Return every `(text, confidence)` candidate found in `region`
    fn recognize(&self, region: &PixelBuffer) -> Result<Vec<Candidate>, AcquisitionError>;
}

//! dtcv-core - DTC display verification core
//!
//! Pure, synchronous building blocks for verifying an instrument cluster's
//! fault-code display:
//! - DM1 / FF99 frame codec (29-bit J1939 identifiers, 8-byte payloads)
//! - numeric validation and correction of recognized SPN/FMI text
//! - lamp luminance and pixel-region cropping
//! - verification of recognized readings against expected entries
//! - entry loading and run reporting

pub mod candidates;
pub mod codec;
pub mod entries;
pub mod error;
pub mod image;
pub mod models;
pub mod report;
pub mod validate;
pub mod verify;

pub use candidates::{
    best_candidate, extract_candidates, rank_candidates, Candidate, CandidateScore,
};
pub use codec::{
    decode_dm1, decode_ff99, encode_dm1, encode_ff99, encode_response, Dm1Reading, Ff99Reading,
};
pub use entries::{load_entries, EntrySet, RowDiagnostic};
pub use error::{CodecError, CodecResult, LoadError, LoadResult};
pub use image::{PixelBuffer, Region};
pub use models::{CanFrame, DtcEntry, Lamp, RecognitionResult};
pub use report::{RunReport, RunStatus};
pub use validate::{FieldKind, Validated, Validator};
pub use verify::{
    FailureArtifactSink, FailureRecord, FieldMismatch, NoArtifacts, Observation, OcrStats,
    OcrSummary, Outcome, VerificationEngine,
};

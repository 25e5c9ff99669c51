//! One acquisition: capture, crop, recognize, validate, measure lamps

use std::sync::Arc;

use dtcv_core::candidates::read_field;
use dtcv_core::image::lamp_on;
use dtcv_core::{FieldKind, PixelBuffer, RecognitionResult, Region, Validated, Validator};
use tracing::{debug, warn};

use super::{AcquisitionError, ImageSource, TextRecognizer};
use crate::config::RecognitionConfig;

/// Output of one acquisition cycle
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub result: RecognitionResult,
    /// A validator correction was applied to SPN or FMI
    pub corrected: bool,
    pub spn: Option<Validated>,
    pub fmi: Option<Validated>,
    /// Frame the reading was taken from
    pub frame: PixelBuffer,
}

/// Capture-and-read pipeline shared by listen and send modes
pub struct AcquisitionPipeline {
    source: Arc<dyn ImageSource>,
    recognizer: Arc<dyn TextRecognizer>,
    config: RecognitionConfig,
    validator: Validator,
}

impl AcquisitionPipeline {
    pub fn new(
        source: Arc<dyn ImageSource>,
        recognizer: Arc<dyn TextRecognizer>,
        config: RecognitionConfig,
    ) -> Self {
        let validator = Validator::new(config.correction_penalty);
        Self {
            source,
            recognizer,
            config,
            validator,
        }
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Run one acquisition on the current thread
    pub fn acquire(&self) -> Result<Acquisition, AcquisitionError> {
        let frame = self.source.capture()?;

        let spn = self.read(&frame, "spn", &self.config.spn_region, FieldKind::Spn)?;
        let fmi = self.read(&frame, "fmi", &self.config.fmi_region, FieldKind::Fmi)?;

        let amber = lamp_on(
            &self.region(&frame, "amber", &self.config.amber_region)?,
            self.config.lamp_threshold,
        );
        let red = lamp_on(
            &self.region(&frame, "red", &self.config.red_region)?,
            self.config.lamp_threshold,
        );

        let corrected = [spn, fmi]
            .iter()
            .flatten()
            .any(|v| v.correction.is_some());

        let result = RecognitionResult::new(
            spn.map(|v| v.value),
            fmi.and_then(|v| u8::try_from(v.value).ok()),
            amber,
            red,
        );

        debug!(
            spn = ?result.spn,
            fmi = ?result.fmi,
            amber,
            red,
            corrected,
            "Acquisition complete"
        );

        Ok(Acquisition {
            result,
            corrected,
            spn,
            fmi,
            frame,
        })
    }

    /// Run one acquisition on the blocking thread pool
    pub async fn acquire_blocking(self: &Arc<Self>) -> Result<Acquisition, AcquisitionError> {
        let pipeline = Arc::clone(self);
        tokio::task::spawn_blocking(move || pipeline.acquire())
            .await
            .map_err(|e| AcquisitionError::Worker(e.to_string()))?
    }

    /// Crop `region` out of `frame`. An empty region selects the whole frame.
    fn region(
        &self,
        frame: &PixelBuffer,
        field: &'static str,
        region: &Region,
    ) -> Result<PixelBuffer, AcquisitionError> {
        if region.is_empty() {
            return Ok(frame.clone());
        }
        frame
            .crop(region)
            .ok_or(AcquisitionError::RegionOutOfFrame {
                field,
                region: *region,
                width: frame.width(),
                height: frame.height(),
            })
    }

    fn read(
        &self,
        frame: &PixelBuffer,
        field: &'static str,
        region: &Region,
        kind: FieldKind,
    ) -> Result<Option<Validated>, AcquisitionError> {
        let crop = self.region(frame, field, region)?;
        let candidates = match self.recognizer.recognize(&crop) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(field, error = %e, "Recognizer failed, field treated as absent");
                return Ok(None);
            }
        };
        Ok(read_field(
            &candidates,
            kind,
            &self.validator,
            self.config.min_confidence,
        ))
    }
}

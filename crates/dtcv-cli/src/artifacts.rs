//! Failure snapshots written to a directory
//!
//! Each mismatch produces `dtc_NNN.json` with the failure record and, when a
//! frame was captured, `dtc_NNN.ppm` with the recognition regions outlined.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dtcv_bench::config::RecognitionConfig;
use dtcv_core::{FailureArtifactSink, FailureRecord, PixelBuffer, Region};
use tracing::{info, warn};

const OUTLINE: [u8; 3] = [255, 0, 0];

pub struct DirectoryArtifacts {
    dir: PathBuf,
    regions: Vec<Region>,
}

impl DirectoryArtifacts {
    /// Create the directory if needed
    pub fn new(dir: &Path, recognition: &RecognitionConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create artifact directory: {}", dir.display()))?;
        let regions = [
            recognition.spn_region,
            recognition.fmi_region,
            recognition.amber_region,
            recognition.red_region,
        ]
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect();
        Ok(Self {
            dir: dir.to_path_buf(),
            regions,
        })
    }

    fn write(&self, record: &FailureRecord, frame: Option<&PixelBuffer>) -> Result<()> {
        let stem = format!("dtc_{:03}", record.index + 1);

        let json = self.dir.join(format!("{}.json", stem));
        let body = serde_json::to_vec_pretty(record)?;
        std::fs::write(&json, body)
            .with_context(|| format!("Failed to write {}", json.display()))?;

        if let Some(frame) = frame {
            let mut annotated = frame.clone();
            for region in &self.regions {
                outline(&mut annotated, region);
            }
            let ppm = self.dir.join(format!("{}.ppm", stem));
            write_ppm(&ppm, &annotated)
                .with_context(|| format!("Failed to write {}", ppm.display()))?;
        }

        info!(index = record.index, dir = %self.dir.display(), "Saved failure snapshot");
        Ok(())
    }
}

impl FailureArtifactSink for DirectoryArtifacts {
    fn on_failure(&self, record: &FailureRecord, frame: Option<&PixelBuffer>) {
        if let Err(e) = self.write(record, frame) {
            warn!(index = record.index, error = %e, "Failure snapshot not saved");
        }
    }
}

/// Draw a one-pixel border around `region`
fn outline(frame: &mut PixelBuffer, region: &Region) {
    if region.is_empty() {
        return;
    }
    let Region {
        x,
        y,
        width,
        height,
    } = *region;
    frame.fill_region(Region::new(x, y, width, 1), OUTLINE);
    frame.fill_region(Region::new(x, y + height - 1, width, 1), OUTLINE);
    frame.fill_region(Region::new(x, y, 1, height), OUTLINE);
    frame.fill_region(Region::new(x + width - 1, y, 1, height), OUTLINE);
}

/// Binary PPM (P6)
fn write_ppm(path: &Path, frame: &PixelBuffer) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write!(file, "P6\n{} {}\n255\n", frame.width(), frame.height())?;
    file.write_all(frame.as_bytes())?;
    file.flush()
}

//! Scripted display for tests and offline rehearsal
//!
//! [`ScriptedDisplay`] implements both [`ImageSource`] and [`TextRecognizer`].
//! Each capture consumes the next [`ScriptedReading`]: it paints the lamp
//! regions of a synthetic frame and queues the SPN and FMI candidates that
//! the following two `recognize` calls return.

use std::collections::VecDeque;

use dtcv_core::{Candidate, DtcEntry, Lamp, PixelBuffer, Region};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{AcquisitionError, ImageSource, TextRecognizer};
use crate::config::RecognitionConfig;

const BACKGROUND: [u8; 3] = [16, 16, 16];
const AMBER_LIT: [u8; 3] = [255, 191, 0];
const RED_LIT: [u8; 3] = [255, 96, 96];
const MIN_FRAME_SIDE: u32 = 16;
const SCRIPT_CONFIDENCE: f32 = 0.95;

/// What the display shows for one acquisition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedReading {
    #[serde(default)]
    pub spn: Vec<Candidate>,
    #[serde(default)]
    pub fmi: Vec<Candidate>,
    #[serde(default)]
    pub amber: bool,
    #[serde(default)]
    pub red: bool,
    /// The capture itself fails
    #[serde(default)]
    pub capture_fails: bool,
}

impl ScriptedReading {
    /// A reading with one confident candidate per field and both lamps off
    pub fn new(spn: &str, fmi: &str) -> Self {
        Self {
            spn: vec![Candidate::new(spn, SCRIPT_CONFIDENCE)],
            fmi: vec![Candidate::new(fmi, SCRIPT_CONFIDENCE)],
            ..Self::default()
        }
    }

    pub fn with_lamps(mut self, amber: bool, red: bool) -> Self {
        self.amber = amber;
        self.red = red;
        self
    }

    pub fn capture_failure() -> Self {
        Self {
            capture_fails: true,
            ..Self::default()
        }
    }

    /// A reading that matches `entry` exactly
    pub fn matching(entry: &DtcEntry) -> Self {
        Self::new(&entry.spn.to_string(), &entry.fmi.to_string())
            .with_lamps(entry.lamp == Lamp::Amber, entry.lamp == Lamp::Red)
    }

    /// Parse a JSON array of readings
    pub fn parse_script(json: &str) -> serde_json::Result<Vec<Self>> {
        serde_json::from_str(json)
    }
}

struct Script {
    readings: VecDeque<ScriptedReading>,
    pending: VecDeque<Vec<Candidate>>,
    captures: usize,
}

/// In-process display driven by a queue of readings
pub struct ScriptedDisplay {
    amber_region: Region,
    red_region: Region,
    width: u32,
    height: u32,
    cycle: bool,
    script: Mutex<Script>,
}

impl ScriptedDisplay {
    /// Create an empty display sized to cover every configured region
    pub fn new(config: &RecognitionConfig) -> Self {
        let regions = [
            config.spn_region,
            config.fmi_region,
            config.amber_region,
            config.red_region,
        ];
        let (width, height) = if regions.iter().all(Region::is_empty) {
            (MIN_FRAME_SIDE, MIN_FRAME_SIDE)
        } else {
            (
                regions.iter().map(|r| r.x + r.width).max().unwrap_or(1),
                regions.iter().map(|r| r.y + r.height).max().unwrap_or(1),
            )
        };

        Self {
            amber_region: config.amber_region,
            red_region: config.red_region,
            width,
            height,
            cycle: false,
            script: Mutex::new(Script {
                readings: VecDeque::new(),
                pending: VecDeque::new(),
                captures: 0,
            }),
        }
    }

    /// Replay the script from the start once it is exhausted
    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    pub fn push(&self, reading: ScriptedReading) {
        self.script.lock().readings.push_back(reading);
    }

    pub fn extend(&self, readings: impl IntoIterator<Item = ScriptedReading>) {
        self.script.lock().readings.extend(readings);
    }

    /// Readings not yet consumed
    pub fn remaining(&self) -> usize {
        self.script.lock().readings.len()
    }

    /// Captures attempted so far
    pub fn captures(&self) -> usize {
        self.script.lock().captures
    }

    fn paint(&self, reading: &ScriptedReading) -> PixelBuffer {
        let mut frame = PixelBuffer::filled(self.width, self.height, BACKGROUND);
        let whole = Region::new(0, 0, self.width, self.height);
        let target = |region: Region| if region.is_empty() { whole } else { region };
        if reading.amber {
            frame.fill_region(target(self.amber_region), AMBER_LIT);
        }
        if reading.red {
            frame.fill_region(target(self.red_region), RED_LIT);
        }
        frame
    }
}

impl ImageSource for ScriptedDisplay {
    fn capture(&self) -> Result<PixelBuffer, AcquisitionError> {
        let mut script = self.script.lock();
        script.captures += 1;
        script.pending.clear();

        let reading = script
            .readings
            .pop_front()
            .ok_or_else(|| AcquisitionError::NoFrame("display script exhausted".to_string()))?;
        if self.cycle {
            script.readings.push_back(reading.clone());
        }
        if reading.capture_fails {
            return Err(AcquisitionError::NoFrame("scripted capture failure".to_string()));
        }

        script.pending.push_back(reading.spn.clone());
        script.pending.push_back(reading.fmi.clone());
        Ok(self.paint(&reading))
    }
}

impl TextRecognizer for ScriptedDisplay {
    fn recognize(&self, _region: &PixelBuffer) -> Result<Vec<Candidate>, AcquisitionError> {
        Ok(self.script.lock().pending.pop_front().unwrap_or_default())
    }
}

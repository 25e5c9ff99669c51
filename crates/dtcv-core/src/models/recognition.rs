//! Values read off the cluster display in one acquisition cycle

use serde::{Deserialize, Serialize};

use super::Lamp;

/// Result of one acquisition; absent fields were not recognized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub spn: Option<u32>,
    pub fmi: Option<u8>,
    pub lamp_amber_on: bool,
    pub lamp_red_on: bool,
}

impl RecognitionResult {
    pub fn new(spn: Option<u32>, fmi: Option<u8>, lamp_amber_on: bool, lamp_red_on: bool) -> Self {
        Self {
            spn,
            fmi,
            lamp_amber_on,
            lamp_red_on,
        }
    }

    /// Lamp label derived from the two flags
    pub fn lamp(&self) -> Lamp {
        Lamp::from_flags(self.lamp_amber_on, self.lamp_red_on)
    }
}

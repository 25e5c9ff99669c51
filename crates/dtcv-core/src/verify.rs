//! Verification of recognized readings against expected entries
//!
//! The engine owns the run-wide counters: compared/matched totals, the error
//! counter bumped on every mismatch or timeout, and per-field OCR statistics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::image::PixelBuffer;
use crate::models::{DtcEntry, Lamp, RecognitionResult};

/// OCR statistics are logged every this many verifications
pub const STATS_LOG_INTERVAL: usize = 10;

/// Number of failure patterns kept in the statistics summary
const TOP_FAILURES: usize = 5;

/// A sub-field that differed from the expected entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMismatch {
    Spn,
    Fmi,
    Lamp,
}

/// Expected vs. actual values for one failed entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    /// Zero-based position in the entry set
    pub index: usize,
    pub expected_spn: u32,
    pub expected_fmi: u8,
    pub expected_lamp: Lamp,
    pub actual_spn: Option<u32>,
    pub actual_fmi: Option<u8>,
    pub actual_lamp: Lamp,
    pub mismatched: Vec<FieldMismatch>,
    /// No acquisition completed within the entry's window
    pub timed_out: bool,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            return write!(
                f,
                "DTC {:3}: FAIL - no acquisition completed (expected SPN={}, FMI={}, LAMP={})",
                self.index + 1,
                self.expected_spn,
                self.expected_fmi,
                self.expected_lamp
            );
        }

        let details: Vec<String> = self
            .mismatched
            .iter()
            .map(|field| match field {
                FieldMismatch::Spn => format!(
                    "SPN: expected {}, got {}",
                    self.expected_spn,
                    display_opt(self.actual_spn)
                ),
                FieldMismatch::Fmi => format!(
                    "FMI: expected {}, got {}",
                    self.expected_fmi,
                    display_opt(self.actual_fmi)
                ),
                FieldMismatch::Lamp => format!(
                    "LAMP: expected {}, got {}",
                    self.expected_lamp, self.actual_lamp
                ),
            })
            .collect();
        write!(f, "DTC {:3}: FAIL - {}", self.index + 1, details.join(" | "))
    }
}

fn display_opt<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// Receives mismatches so the surrounding system can save an annotated snapshot
pub trait FailureArtifactSink: Send + Sync {
    fn on_failure(&self, record: &FailureRecord, frame: Option<&PixelBuffer>);
}

/// Sink that discards failure artifacts
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArtifacts;

impl FailureArtifactSink for NoArtifacts {
    fn on_failure(&self, _record: &FailureRecord, _frame: Option<&PixelBuffer>) {}
}

/// What a single acquisition produced
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub result: RecognitionResult,
    /// A validator correction was applied to SPN or FMI
    pub corrected: bool,
    /// Frame the reading was taken from, for failure artifacts
    pub frame: Option<&'a PixelBuffer>,
}

impl From<RecognitionResult> for Observation<'_> {
    fn from(result: RecognitionResult) -> Self {
        Self {
            result,
            corrected: false,
            frame: None,
        }
    }
}

/// Result of one verification
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Match,
    Mismatch(FailureRecord),
}

impl Outcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Outcome::Match)
    }
}

/// Per-field recognition statistics
#[derive(Debug, Clone, Default)]
pub struct OcrStats {
    total_tests: usize,
    spn_success: usize,
    fmi_success: usize,
    corrections_applied: usize,
    failures: HashMap<String, usize>,
}

/// Snapshot of [`OcrStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrSummary {
    pub total_tests: usize,
    pub spn_success_rate: f64,
    pub fmi_success_rate: f64,
    pub overall_success_rate: f64,
    pub corrections_applied: usize,
    /// Most frequent `FIELD_expected→actual` patterns, most common first
    pub top_failures: Vec<(String, usize)>,
}

impl OcrStats {
    pub fn record(
        &mut self,
        expected: &DtcEntry,
        actual_spn: Option<u32>,
        actual_fmi: Option<u8>,
        corrected: bool,
    ) {
        self.total_tests += 1;

        if actual_spn == Some(expected.spn) {
            self.spn_success += 1;
        } else {
            let pattern = format!("SPN_{}→{}", expected.spn, display_opt(actual_spn));
            *self.failures.entry(pattern).or_default() += 1;
        }

        if actual_fmi == Some(expected.fmi) {
            self.fmi_success += 1;
        } else {
            let pattern = format!("FMI_{}→{}", expected.fmi, display_opt(actual_fmi));
            *self.failures.entry(pattern).or_default() += 1;
        }

        if corrected {
            self.corrections_applied += 1;
        }
    }

    pub fn total_tests(&self) -> usize {
        self.total_tests
    }

    pub fn summary(&self) -> OcrSummary {
        let rate = |n: usize, d: usize| {
            if d == 0 {
                0.0
            } else {
                n as f64 / d as f64 * 100.0
            }
        };

        let mut top_failures: Vec<(String, usize)> =
            self.failures.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_failures.truncate(TOP_FAILURES);

        OcrSummary {
            total_tests: self.total_tests,
            spn_success_rate: rate(self.spn_success, self.total_tests),
            fmi_success_rate: rate(self.fmi_success, self.total_tests),
            overall_success_rate: rate(self.spn_success + self.fmi_success, self.total_tests * 2),
            corrections_applied: self.corrections_applied,
            top_failures,
        }
    }
}

/// Compares readings to expected entries and keeps run statistics
pub struct VerificationEngine {
    total_compared: usize,
    total_matched: usize,
    error_count: usize,
    timed_out: usize,
    stats: OcrStats,
    failures: Vec<FailureRecord>,
    sink: Arc<dyn FailureArtifactSink>,
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NoArtifacts))
    }

    pub fn with_sink(sink: Arc<dyn FailureArtifactSink>) -> Self {
        Self {
            total_compared: 0,
            total_matched: 0,
            error_count: 0,
            timed_out: 0,
            stats: OcrStats::default(),
            failures: Vec::new(),
            sink,
        }
    }

    /// Compare one reading against `entry`, updating its error flag
    pub fn verify(
        &mut self,
        index: usize,
        entry: &mut DtcEntry,
        observation: Observation<'_>,
    ) -> Outcome {
        let actual = observation.result;
        let actual_lamp = actual.lamp();

        let mut mismatched = Vec::new();
        if actual.spn != Some(entry.spn) {
            mismatched.push(FieldMismatch::Spn);
        }
        if actual.fmi != Some(entry.fmi) {
            mismatched.push(FieldMismatch::Fmi);
        }
        if actual_lamp != entry.lamp {
            mismatched.push(FieldMismatch::Lamp);
        }

        self.total_compared += 1;
        self.stats
            .record(entry, actual.spn, actual.fmi, observation.corrected);
        if self.stats.total_tests() % STATS_LOG_INTERVAL == 0 {
            let summary = self.stats.summary();
            info!(
                total_tests = summary.total_tests,
                overall = %format!("{:.1}%", summary.overall_success_rate),
                spn = %format!("{:.1}%", summary.spn_success_rate),
                fmi = %format!("{:.1}%", summary.fmi_success_rate),
                "OCR stats"
            );
        }

        if mismatched.is_empty() {
            entry.error_found = false;
            self.total_matched += 1;
            info!(
                "DTC {:3}: PASS - SPN={}, FMI={}, LAMP={}",
                index + 1,
                entry.spn,
                entry.fmi,
                entry.lamp
            );
            return Outcome::Match;
        }

        entry.error_found = true;
        self.error_count += 1;

        let record = FailureRecord {
            index,
            expected_spn: entry.spn,
            expected_fmi: entry.fmi,
            expected_lamp: entry.lamp,
            actual_spn: actual.spn,
            actual_fmi: actual.fmi,
            actual_lamp,
            mismatched,
            timed_out: false,
            timestamp: Utc::now(),
        };
        warn!("{}", record);

        self.sink.on_failure(&record, observation.frame);
        self.failures.push(record.clone());
        Outcome::Mismatch(record)
    }

    /// Record an entry whose acquisition never completed
    pub fn record_timeout(&mut self, index: usize, entry: &mut DtcEntry) -> FailureRecord {
        entry.error_found = true;
        self.error_count += 1;
        self.timed_out += 1;

        let record = FailureRecord {
            index,
            expected_spn: entry.spn,
            expected_fmi: entry.fmi,
            expected_lamp: entry.lamp,
            actual_spn: None,
            actual_fmi: None,
            actual_lamp: Lamp::None,
            mismatched: vec![FieldMismatch::Spn, FieldMismatch::Fmi],
            timed_out: true,
            timestamp: Utc::now(),
        };
        warn!("{}", record);

        self.failures.push(record.clone());
        record
    }

    pub fn total_compared(&self) -> usize {
        self.total_compared
    }

    pub fn total_matched(&self) -> usize {
        self.total_matched
    }

    /// Mismatches plus timeouts
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn timed_out(&self) -> usize {
        self.timed_out
    }

    /// Matched share of compared entries, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_compared == 0 {
            return 0.0;
        }
        self.total_matched as f64 / self.total_compared as f64 * 100.0
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn stats(&self) -> &OcrStats {
        &self.stats
    }
}

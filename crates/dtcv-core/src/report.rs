//! End-of-run summary

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::verify::{FailureRecord, OcrSummary, VerificationEngine};

/// How a sequence run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    CompletedSuccessfully,
    CompletedWithErrors,
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::CompletedSuccessfully => "Test completed successfully",
            RunStatus::CompletedWithErrors => "Test completed with errors",
            RunStatus::Stopped => "Test stopped",
        };
        f.write_str(s)
    }
}

/// Aggregate outcome of a DTC sequence
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_entries: usize,
    /// Entries that went through verification
    pub compared: usize,
    pub passed: usize,
    /// Mismatches plus timeouts
    pub failed: usize,
    pub timed_out: usize,
    pub success_rate: f64,
    pub status: RunStatus,
    pub failures: Vec<FailureRecord>,
    pub ocr: OcrSummary,
}

impl RunReport {
    pub fn from_engine(
        engine: &VerificationEngine,
        total_entries: usize,
        started_at: DateTime<Utc>,
        stopped: bool,
    ) -> Self {
        let failed = engine.error_count();
        let status = if stopped {
            RunStatus::Stopped
        } else if failed == 0 {
            RunStatus::CompletedSuccessfully
        } else {
            RunStatus::CompletedWithErrors
        };

        let success_rate = if total_entries == 0 {
            0.0
        } else {
            engine.total_matched() as f64 / total_entries as f64 * 100.0
        };

        Self {
            started_at,
            finished_at: Utc::now(),
            total_entries,
            compared: engine.total_compared(),
            passed: engine.total_matched(),
            failed,
            timed_out: engine.timed_out(),
            success_rate,
            status,
            failures: engine.failures().to_vec(),
            ocr: engine.stats().summary(),
        }
    }

    /// `Passed 9/10 (90.0%)`
    pub fn summary_line(&self) -> String {
        format!(
            "Passed {}/{} ({:.1}%)",
            self.passed, self.total_entries, self.success_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DtcEntry, Lamp, RecognitionResult};

    #[test]
    fn test_report_from_engine() {
        let started = Utc::now();
        let mut engine = VerificationEngine::new();
        let mut ok = DtcEntry::new(100, 1, Lamp::None, 0).unwrap();
        let mut bad = DtcEntry::new(200, 2, Lamp::Red, 0).unwrap();
        let mut late = DtcEntry::new(300, 3, Lamp::None, 0).unwrap();

        engine.verify(
            0,
            &mut ok,
            RecognitionResult::new(Some(100), Some(1), false, false).into(),
        );
        engine.verify(
            1,
            &mut bad,
            RecognitionResult::new(Some(200), Some(2), false, false).into(),
        );
        engine.record_timeout(2, &mut late);

        let report = RunReport::from_engine(&engine, 4, started, false);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.compared, 2);
        assert_eq!(report.status, RunStatus::CompletedWithErrors);
        assert_eq!(report.summary_line(), "Passed 1/4 (25.0%)");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed_with_errors");
        assert_eq!(json["failures"][0]["mismatched"][0], "LAMP");
    }

    #[test]
    fn test_stopped_status_wins() {
        let engine = VerificationEngine::new();
        let report = RunReport::from_engine(&engine, 3, Utc::now(), true);
        assert_eq!(report.status, RunStatus::Stopped);
        assert_eq!(report.status.to_string(), "Test stopped");
    }
}

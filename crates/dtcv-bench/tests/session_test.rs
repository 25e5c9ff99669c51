//! End-to-end session tests on the mock bus
//!
//! All tests run on a paused clock, so the 35-unit settle timer and the
//! 36-unit entry window elapse instantly.

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use dtcv_bench::config::RecognitionConfig;
use dtcv_bench::{
    AcquisitionPipeline, AcquisitionScheduler, BenchConfig, CanTransport, DtcSequencer,
    MockCanTransport, Mode, SchedulerEvent, SchedulerState, ScriptedDisplay, ScriptedReading,
    StopReason,
};
use dtcv_core::codec::pgn;
use dtcv_core::verify::FieldMismatch;
use dtcv_core::{
    encode_dm1, DtcEntry, FailureArtifactSink, FailureRecord, Lamp, PixelBuffer, Region,
    RunStatus,
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

// =============================================================================
// Harness
// =============================================================================

struct Bench {
    scheduler: Arc<AcquisitionScheduler>,
    transport: Arc<MockCanTransport>,
    display: Arc<ScriptedDisplay>,
}

fn layout() -> RecognitionConfig {
    RecognitionConfig {
        spn_region: Region::new(0, 0, 60, 20),
        fmi_region: Region::new(60, 0, 20, 20),
        amber_region: Region::new(0, 20, 10, 10),
        red_region: Region::new(10, 20, 10, 10),
        ..RecognitionConfig::default()
    }
}

fn bench() -> Bench {
    let config = BenchConfig {
        recognition: layout(),
        ..BenchConfig::default()
    };
    let transport = Arc::new(MockCanTransport::new());
    let display = Arc::new(ScriptedDisplay::new(&config.recognition));
    let pipeline = Arc::new(AcquisitionPipeline::new(
        display.clone(),
        display.clone(),
        config.recognition.clone(),
    ));
    let scheduler = Arc::new(AcquisitionScheduler::new(
        config,
        transport.clone(),
        pipeline,
    ));
    Bench {
        scheduler,
        transport,
        display,
    }
}

fn entries(n: u32) -> Vec<DtcEntry> {
    let lamps = [Lamp::Amber, Lamp::Red, Lamp::None];
    (0..n)
        .map(|i| DtcEntry::new(520_000 + i, (i % 32) as u8, lamps[i as usize % 3], 0).unwrap())
        .collect()
}

fn drain(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn units(n: u64) {
    tokio::time::sleep(Duration::from_secs(n)).await;
}

// =============================================================================
// Listen mode
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_listen_responds_after_settle() {
    let bench = bench();
    bench
        .display
        .push(ScriptedReading::new("520313", "14").with_lamps(true, false));
    bench.scheduler.start_listen().await.unwrap();

    bench
        .transport
        .inject(encode_dm1(520313, 14, Lamp::Amber, 0x00));
    units(34).await;
    assert!(bench.transport.sent_frames().is_empty());
    assert_eq!(
        bench.scheduler.snapshot().state,
        SchedulerState::AcquisitionScheduled
    );

    units(2).await;
    let sent = bench.transport.sent_with_pgn(pgn::FF99);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data, [0x07, 0xF0, 0x79, 0x00, 0x00, 0x0E, 0x01, 0x00]);

    let snapshot = bench.scheduler.snapshot();
    assert_eq!(snapshot.state, SchedulerState::RunningIdle);
    assert_eq!(snapshot.message_counter, 1);
    assert!(snapshot.has_signature);

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listen_duplicate_payload_not_reprocessed() {
    let bench = bench();
    bench.display.extend([
        ScriptedReading::new("520313", "14"),
        ScriptedReading::new("100", "2"),
    ]);
    bench.scheduler.start_listen().await.unwrap();

    let dm1 = encode_dm1(520313, 14, Lamp::Amber, 0x00);
    bench.transport.inject(dm1);
    units(36).await;
    bench.transport.inject(dm1);
    units(36).await;
    assert_eq!(bench.transport.sent_with_pgn(pgn::FF99).len(), 1);

    bench
        .transport
        .inject(encode_dm1(100, 2, Lamp::Red, 0x00));
    units(36).await;
    assert_eq!(bench.transport.sent_with_pgn(pgn::FF99).len(), 2);
    assert_eq!(bench.display.captures(), 2);

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listen_at_most_one_acquisition() {
    let bench = bench();
    bench.display.push(ScriptedReading::new("520313", "14"));
    bench.scheduler.start_listen().await.unwrap();

    bench
        .transport
        .inject(encode_dm1(520313, 14, Lamp::Amber, 0x00));
    bench
        .transport
        .inject(encode_dm1(100, 2, Lamp::Red, 0x00));
    units(10).await;
    bench
        .transport
        .inject(encode_dm1(190, 3, Lamp::None, 0x00));
    units(60).await;

    assert_eq!(bench.display.captures(), 1);
    let sent = bench.transport.sent_with_pgn(pgn::FF99);
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0].data[..3], &[0x07, 0xF0, 0x79]);

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listen_ignores_own_source_address() {
    let bench = bench();
    bench.display.push(ScriptedReading::new("520313", "14"));
    bench.scheduler.start_listen().await.unwrap();

    bench
        .transport
        .inject(encode_dm1(520313, 14, Lamp::Amber, 0x27));
    units(40).await;

    assert!(bench.transport.sent_frames().is_empty());
    assert_eq!(bench.display.captures(), 0);
    assert_eq!(
        bench.scheduler.snapshot().state,
        SchedulerState::RunningIdle
    );

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listen_failed_capture_keeps_trigger_eligible() {
    let bench = bench();
    bench.display.extend([
        ScriptedReading::capture_failure(),
        ScriptedReading::new("520313", "14"),
    ]);
    let mut events = bench.scheduler.subscribe();
    bench.scheduler.start_listen().await.unwrap();

    let dm1 = encode_dm1(520313, 14, Lamp::Amber, 0x00);
    bench.transport.inject(dm1);
    units(36).await;
    assert!(bench.transport.sent_frames().is_empty());
    assert!(!bench.scheduler.snapshot().has_signature);

    bench.transport.inject(dm1);
    units(36).await;
    assert_eq!(bench.transport.sent_with_pgn(pgn::FF99).len(), 1);

    let failed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SchedulerEvent::AcquisitionFailed { index: None, .. }))
        .count();
    assert_eq!(failed, 1);

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listen_unreadable_fields_sent_as_zero() {
    let bench = bench();
    bench.display.push(ScriptedReading::default().with_lamps(false, true));
    bench.scheduler.start_listen().await.unwrap();

    bench
        .transport
        .inject(encode_dm1(520313, 14, Lamp::Red, 0x00));
    units(36).await;

    let sent = bench.transport.sent_with_pgn(pgn::FF99);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data, [0, 0, 0, 0, 0, 0, 0, 1]);

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_timer_and_is_idempotent() {
    let bench = bench();
    bench.display.push(ScriptedReading::new("520313", "14"));
    let mut events = bench.scheduler.subscribe();
    bench.scheduler.start_listen().await.unwrap();

    bench
        .transport
        .inject(encode_dm1(520313, 14, Lamp::Amber, 0x00));
    units(10).await;

    bench.scheduler.stop().await;
    bench.scheduler.stop().await;
    units(60).await;

    assert!(bench.transport.sent_frames().is_empty());
    assert_eq!(bench.display.captures(), 0);
    assert!(!bench.transport.is_open());
    assert_eq!(bench.transport.close_count(), 1);

    let snapshot = bench.scheduler.snapshot();
    assert_eq!(snapshot.state, SchedulerState::Idle);
    assert!(!snapshot.acquisition_scheduled);

    let stops: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SchedulerEvent::Stopped { reason } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(stops, vec![StopReason::Requested]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_resets_session() {
    let bench = bench();
    bench.display.extend([
        ScriptedReading::new("520313", "14"),
        ScriptedReading::new("520313", "14"),
    ]);
    let dm1 = encode_dm1(520313, 14, Lamp::Amber, 0x00);

    bench.scheduler.start_listen().await.unwrap();
    bench.transport.inject(dm1);
    units(36).await;
    bench.scheduler.stop().await;

    bench.scheduler.start_listen().await.unwrap();
    let snapshot = bench.scheduler.snapshot();
    assert_eq!(snapshot.mode, Mode::Listen);
    assert_eq!(snapshot.message_counter, 0);
    assert!(!snapshot.has_signature);

    // the same payload is eligible again in the new session
    bench.transport.inject(dm1);
    units(36).await;
    assert_eq!(bench.transport.sent_with_pgn(pgn::FF99).len(), 2);

    bench.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_listen_send_failure_stops_session() {
    let bench = bench();
    bench.display.push(ScriptedReading::new("520313", "14"));
    let mut events = bench.scheduler.subscribe();
    bench.scheduler.start_listen().await.unwrap();

    bench.transport.set_fail_send(true);
    bench
        .transport
        .inject(encode_dm1(520313, 14, Lamp::Amber, 0x00));
    units(37).await;

    assert!(!bench.scheduler.is_running());
    assert!(!bench.transport.is_open());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SchedulerEvent::Stopped {
            reason: StopReason::TransportFailure(_)
        }
    )));
}

// =============================================================================
// Send mode
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sequence_all_pass() {
    let bench = bench();
    let entries = entries(3);
    bench
        .display
        .extend(entries.iter().map(ScriptedReading::matching));
    let sequencer = DtcSequencer::new(bench.scheduler.clone());

    let report = sequencer.run(entries).await.unwrap();
    assert_eq!(report.status, RunStatus::CompletedSuccessfully);
    assert_eq!(report.total_entries, 3);
    assert_eq!(report.passed, 3);
    assert_eq!(report.failed, 0);
    assert!((report.success_rate - 100.0).abs() < f64::EPSILON);

    let dm1 = bench.transport.sent_with_pgn(pgn::DM1);
    assert!(dm1.len() >= 3 * 35);
    assert!(bench.transport.sent_with_pgn(pgn::FF99).is_empty());
    assert!(!bench.scheduler.is_running());
    assert!(bench.scheduler.entries().iter().all(|e| !e.error_found));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_records_mismatch() {
    let bench = bench();
    let entry = DtcEntry::new(520313, 14, Lamp::Amber, 0).unwrap();
    bench
        .display
        .push(ScriptedReading::new("520313", "13").with_lamps(true, false));
    let sequencer = DtcSequencer::new(bench.scheduler.clone());

    let report = sequencer.run(vec![entry]).await.unwrap();
    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.failed, 1);

    let failure = &report.failures[0];
    assert_eq!(failure.mismatched, vec![FieldMismatch::Fmi]);
    assert_eq!(failure.expected_fmi, 14);
    assert_eq!(failure.actual_fmi, Some(13));
    assert_eq!(failure.actual_spn, Some(520313));
    assert!(!failure.timed_out);
    assert!(bench.scheduler.entries()[0].error_found);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_timeout_forces_advance() {
    let bench = bench();
    let entries = entries(10);
    for (i, entry) in entries.iter().enumerate() {
        if i == 3 {
            bench.display.push(ScriptedReading::capture_failure());
        } else {
            bench.display.push(ScriptedReading::matching(entry));
        }
    }
    let mut events = bench.scheduler.subscribe();
    let sequencer = DtcSequencer::new(bench.scheduler.clone());

    let report = sequencer.run(entries).await.unwrap();
    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.passed, 9);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 3);
    assert!(report.failures[0].timed_out);

    let flags: Vec<bool> = bench
        .scheduler
        .entries()
        .iter()
        .map(|e| e.error_found)
        .collect();
    assert_eq!(flags.iter().filter(|f| **f).count(), 1);
    assert!(flags[3]);

    let events = drain(&mut events);
    let timed_out = events
        .iter()
        .position(|e| matches!(e, SchedulerEvent::EntryTimedOut { index: 3 }))
        .unwrap();
    assert!(matches!(
        events[timed_out + 1..]
            .iter()
            .find(|e| matches!(e, SchedulerEvent::EntryStarted { .. })),
        Some(SchedulerEvent::EntryStarted { index: 4, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_events_and_countdown() {
    let bench = bench();
    let entry = DtcEntry::new(520313, 14, Lamp::Red, 0).unwrap();
    bench.display.push(ScriptedReading::matching(&entry));
    let mut events = bench.scheduler.subscribe();
    let sequencer = DtcSequencer::new(bench.scheduler.clone());

    sequencer.run(vec![entry]).await.unwrap();

    let events = drain(&mut events);
    assert!(matches!(
        events.first(),
        Some(SchedulerEvent::Started {
            mode: Mode::Send,
            ..
        })
    ));
    assert!(matches!(
        events.last(),
        Some(SchedulerEvent::SequenceCompleted {
            status: RunStatus::CompletedSuccessfully,
            passed: 1,
            total: 1
        })
    ));

    let countdown: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::Countdown {
                remaining_units, ..
            } => Some(*remaining_units),
            _ => None,
        })
        .collect();
    assert_eq!(countdown, vec![35, 20, 10, 5, 4, 3, 2, 1]);

    assert!(events.iter().any(|e| matches!(
        e,
        SchedulerEvent::Verified {
            index: 0,
            matched: true,
            failure: None
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_stop_returns_partial_report() {
    let bench = bench();
    let entries = entries(5);
    bench
        .display
        .extend(entries.iter().map(ScriptedReading::matching));
    let sequencer = Arc::new(DtcSequencer::new(bench.scheduler.clone()));

    let runner = sequencer.clone();
    let task = tokio::spawn(async move { runner.run(entries).await });

    // first entry verified at 35, second entry starts at 36
    units(50).await;
    sequencer.stop().await;
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.status, RunStatus::Stopped);
    assert_eq!(report.passed, 1);
    assert_eq!(report.compared, 1);
    assert!(!bench.transport.is_open());
}

/// Reads the session back while saving, as a UI-backed sink would
#[derive(Default)]
struct SnapshotSink {
    scheduler: OnceLock<Weak<AcquisitionScheduler>>,
    saved: Mutex<Vec<(usize, Option<usize>, Option<(u32, u32)>)>>,
}

impl FailureArtifactSink for SnapshotSink {
    fn on_failure(&self, record: &FailureRecord, frame: Option<&PixelBuffer>) {
        let current = self
            .scheduler
            .get()
            .and_then(Weak::upgrade)
            .map(|scheduler| scheduler.snapshot().current_index);
        let size = frame.map(|f| (f.width(), f.height()));
        self.saved.lock().unwrap().push((record.index, current, size));
    }
}

#[tokio::test(start_paused = true)]
async fn test_sequence_failure_sink_runs_outside_session_lock() {
    let config = BenchConfig {
        recognition: layout(),
        ..BenchConfig::default()
    };
    let transport = Arc::new(MockCanTransport::new());
    let display = Arc::new(ScriptedDisplay::new(&config.recognition));
    let pipeline = Arc::new(AcquisitionPipeline::new(
        display.clone(),
        display.clone(),
        config.recognition.clone(),
    ));
    let sink = Arc::new(SnapshotSink::default());
    let scheduler = Arc::new(AcquisitionScheduler::with_sink(
        config,
        transport,
        pipeline,
        sink.clone(),
    ));
    sink.scheduler.set(Arc::downgrade(&scheduler)).unwrap();

    let entries = vec![
        DtcEntry::new(520313, 14, Lamp::Amber, 0).unwrap(),
        DtcEntry::new(190, 2, Lamp::Red, 0).unwrap(),
    ];
    display.push(ScriptedReading::new("520313", "13").with_lamps(true, false));
    display.push(ScriptedReading::matching(&entries[1]));

    let report = DtcSequencer::new(scheduler.clone())
        .run(entries)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.passed, 1);

    // the session had already advanced when the sink ran, and it got the frame
    let saved = sink.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    let (index, current, size) = saved[0];
    assert_eq!(index, 0);
    assert_eq!(current, Some(1));
    assert!(size.is_some());
}

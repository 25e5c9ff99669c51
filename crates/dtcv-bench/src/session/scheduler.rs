//! Acquisition scheduler
//!
//! Owns the [`AcquisitionSession`], the CAN transport and the settle timer.
//!
//! - Listen mode: a bus worker polls the transport. A DM1 from any source
//!   other than the bench's own address, with a payload different from the
//!   last processed one, arms the settle timer. When it fires the display is
//!   read and an FF99 response is sent.
//! - Send mode: [`AcquisitionScheduler::schedule_for_index`] arms the settle
//!   timer for the entry under test. When it fires the display is read,
//!   verified against the entry, and the session advances to the next entry.
//!
//! At most one acquisition is scheduled or in flight at any time; the check
//! and the set of `acquisition_scheduled` happen under one lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dtcv_core::codec::{encode_response, pgn};
use dtcv_core::{
    CanFrame, DtcEntry, FailureArtifactSink, NoArtifacts, Observation, Outcome, RunReport,
    VerificationEngine,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    AcquisitionSession, Mode, SchedulerError, SchedulerEvent, SessionSnapshot, SettleTimer,
    StopReason,
};
use crate::acquisition::AcquisitionPipeline;
use crate::config::BenchConfig;
use crate::transport::CanTransport;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Entries and verification state of a send-mode session
struct SendRun {
    entries: Vec<DtcEntry>,
    engine: VerificationEngine,
    started_at: DateTime<Utc>,
}

struct Shared {
    session: AcquisitionSession,
    run: Option<SendRun>,
}

struct Inner {
    config: BenchConfig,
    transport: Arc<dyn CanTransport>,
    pipeline: Arc<AcquisitionPipeline>,
    sink: Arc<dyn FailureArtifactSink>,
    shared: Mutex<Shared>,
    timer: SettleTimer,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SchedulerEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
}

/// Schedules display acquisitions in response to bus traffic or entry progress
pub struct AcquisitionScheduler {
    inner: Arc<Inner>,
}

impl AcquisitionScheduler {
    pub fn new(
        config: BenchConfig,
        transport: Arc<dyn CanTransport>,
        pipeline: Arc<AcquisitionPipeline>,
    ) -> Self {
        Self::with_sink(config, transport, pipeline, Arc::new(NoArtifacts))
    }

    /// Create a scheduler whose send-mode failures are reported to `sink`
    pub fn with_sink(
        config: BenchConfig,
        transport: Arc<dyn CanTransport>,
        pipeline: Arc<AcquisitionPipeline>,
        sink: Arc<dyn FailureArtifactSink>,
    ) -> Self {
        let session = AcquisitionSession::default();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshots, _) = watch::channel(session.snapshot());

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                pipeline,
                sink,
                shared: Mutex::new(Shared { session, run: None }),
                timer: SettleTimer::new(),
                worker: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                events,
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Receiver that always holds the latest session snapshot
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.shared.lock().session.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.lock().session.running
    }

    /// Open the transport and start reacting to DM1 frames
    pub async fn start_listen(&self) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;
        if inner.shared.lock().session.running {
            return Err(SchedulerError::AlreadyRunning);
        }

        inner.open_transport().await?;

        let generation = {
            let mut shared = inner.shared.lock();
            shared.session.restart(Mode::Listen);
            shared.run = None;
            inner.publish(&shared.session);
            shared.session.generation
        };

        let worker = tokio::spawn(Arc::clone(inner).bus_worker(generation));
        if let Some(previous) = inner.worker.lock().replace(worker) {
            previous.abort();
        }

        info!(
            generation,
            ignore_source_address = inner.config.listen.ignore_source_address,
            "Listen session started"
        );
        inner.emit(SchedulerEvent::Started {
            mode: Mode::Listen,
            generation,
        });
        Ok(())
    }

    /// Open the transport and load `entries` for a send-mode run
    pub async fn start_send(&self, mut entries: Vec<DtcEntry>) -> Result<(), SchedulerError> {
        if entries.is_empty() {
            return Err(SchedulerError::EmptyEntrySet);
        }

        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;
        if inner.shared.lock().session.running {
            return Err(SchedulerError::AlreadyRunning);
        }

        inner.open_transport().await?;

        for entry in &mut entries {
            entry.error_found = false;
        }
        let total = entries.len();

        let generation = {
            let mut shared = inner.shared.lock();
            shared.session.restart(Mode::Send);
            shared.run = Some(SendRun {
                entries,
                engine: VerificationEngine::new(),
                started_at: Utc::now(),
            });
            inner.publish(&shared.session);
            shared.session.generation
        };

        info!(generation, entries = total, "Send session started");
        inner.emit(SchedulerEvent::Started {
            mode: Mode::Send,
            generation,
        });
        Ok(())
    }

    /// Feed one received frame to the listen-mode trigger.
    ///
    /// Returns true if the frame armed the settle timer.
    pub fn handle_frame(&self, frame: &CanFrame) -> bool {
        self.inner.handle_frame(frame)
    }

    /// Arm the settle timer for entry `index` (send mode).
    ///
    /// Refused when `index` is not the entry under test, when an acquisition
    /// is already scheduled, or when the entry was already processed.
    pub fn schedule_for_index(&self, index: usize) -> bool {
        let inner = &self.inner;
        let mut shared = inner.shared.lock();
        let Shared { session, run } = &mut *shared;

        if !session.running || session.mode != Mode::Send {
            return false;
        }
        let total = run.as_ref().map(|r| r.entries.len()).unwrap_or(0);
        if index != session.current_index || index >= total {
            return false;
        }
        if session.acquisition_scheduled {
            debug!(index, "Acquisition already scheduled");
            return false;
        }
        if session.last_processed_index == Some(index) {
            debug!(index, "Entry already processed");
            return false;
        }

        session.acquisition_scheduled = true;
        let generation = session.generation;
        let cycle = Arc::clone(inner).run_send_cycle(generation, index);
        inner.timer.arm(generation, inner.config.timing.settle(), cycle);
        inner.publish(session);

        debug!(index, "Acquisition scheduled");
        true
    }

    /// Give up on entry `index`: record a timeout failure and advance.
    ///
    /// No-op (returns false) if the session already moved past `index`.
    pub fn force_advance(&self, index: usize) -> bool {
        let inner = &self.inner;
        {
            let mut shared = inner.shared.lock();
            let Shared { session, run } = &mut *shared;

            if !session.running || session.mode != Mode::Send || session.current_index != index {
                return false;
            }
            let Some(run) = run.as_mut() else {
                return false;
            };
            let Some(entry) = run.entries.get_mut(index) else {
                return false;
            };

            run.engine.record_timeout(index, entry);
            session.current_index = index + 1;
            session.acquisition_scheduled = false;
            inner.publish(session);
        }

        inner.timer.cancel();
        inner.emit(SchedulerEvent::EntryTimedOut { index });
        true
    }

    /// Send one frame through the session's transport.
    ///
    /// A transport failure stops the session.
    pub async fn transmit(&self, frame: &CanFrame) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        if let Err(e) = inner.transport.send(frame).await {
            // a concurrent stop closes the transport under an in-flight send
            if !self.is_running() {
                debug!(error = %e, "Transmit raced a stop");
                return Err(SchedulerError::NotRunning);
            }
            error!(error = %e, frame = %frame, "Transmit failed, stopping session");
            inner
                .shutdown(StopReason::TransportFailure(e.to_string()))
                .await;
            return Err(e.into());
        }

        let mut shared = inner.shared.lock();
        shared.session.message_counter += 1;
        inner.publish(&shared.session);
        Ok(())
    }

    /// Stop the session. Safe to call repeatedly, and while idle.
    pub async fn stop(&self) {
        self.inner.shutdown(StopReason::Requested).await;
    }

    pub(crate) async fn finish(&self) {
        self.inner.shutdown(StopReason::Completed).await;
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        self.inner.emit(event);
    }

    pub fn entry(&self, index: usize) -> Option<DtcEntry> {
        let shared = self.inner.shared.lock();
        shared.run.as_ref()?.entries.get(index).cloned()
    }

    /// Entries of the current or last send-mode run, with error flags
    pub fn entries(&self) -> Vec<DtcEntry> {
        self.inner
            .shared
            .lock()
            .run
            .as_ref()
            .map(|r| r.entries.clone())
            .unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.inner
            .shared
            .lock()
            .run
            .as_ref()
            .map(|r| r.entries.len())
            .unwrap_or(0)
    }

    /// Report for the current or last send-mode run
    pub fn report(&self, stopped: bool) -> Option<RunReport> {
        let shared = self.inner.shared.lock();
        let run = shared.run.as_ref()?;
        Some(RunReport::from_engine(
            &run.engine,
            run.entries.len(),
            run.started_at,
            stopped,
        ))
    }
}

impl Drop for AcquisitionScheduler {
    fn drop(&mut self) {
        {
            let mut shared = self.inner.shared.lock();
            shared.session.running = false;
            shared.session.generation += 1;
        }
        self.inner.timer.cancel();
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.abort();
        }
    }
}

impl Inner {
    fn emit(&self, event: SchedulerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self, session: &AcquisitionSession) {
        self.snapshots.send_replace(session.snapshot());
    }

    fn is_current(&self, generation: u64) -> bool {
        let shared = self.shared.lock();
        shared.session.running && shared.session.generation == generation
    }

    async fn open_transport(&self) -> Result<(), SchedulerError> {
        self.transport.open().await.map_err(|e| {
            error!(error = %e, "Failed to open CAN transport");
            SchedulerError::from(e)
        })
    }

    fn handle_frame(self: &Arc<Self>, frame: &CanFrame) -> bool {
        if !frame.extended || frame.pgn() != pgn::DM1 {
            return false;
        }
        let source_address = frame.source_address();
        if source_address == self.config.listen.ignore_source_address {
            return false;
        }

        {
            let mut shared = self.shared.lock();
            let session = &mut shared.session;

            if !session.running || session.mode != Mode::Listen {
                return false;
            }
            if session.acquisition_scheduled {
                debug!(source_address, "DM1 ignored, acquisition already scheduled");
                return false;
            }
            if session.last_processed_signature == Some(frame.data) {
                debug!(payload = %frame.data_hex(), "Duplicate DM1 ignored");
                return false;
            }

            session.pending_signature = Some(frame.data);
            session.acquisition_scheduled = true;
            let generation = session.generation;
            let cycle = Arc::clone(self).run_listen_cycle(generation);
            self.timer.arm(generation, self.config.timing.settle(), cycle);
            self.publish(session);
        }

        info!(
            source_address,
            payload = %frame.data_hex(),
            settle_ms = self.config.timing.settle().as_millis() as u64,
            "DM1 received, acquisition scheduled"
        );
        self.emit(SchedulerEvent::Triggered {
            source_address,
            payload: frame.data_hex(),
        });
        true
    }

    async fn bus_worker(self: Arc<Self>, generation: u64) {
        let poll = self.config.timing.poll_timeout();
        debug!(generation, "Bus worker started");

        while self.is_current(generation) {
            match self.transport.receive(poll).await {
                Ok(Some(frame)) => {
                    self.handle_frame(&frame);
                }
                Ok(None) => {}
                Err(e) => {
                    if self.is_current(generation) {
                        error!(error = %e, "CAN receive failed, stopping session");
                        self.shutdown(StopReason::TransportFailure(e.to_string()))
                            .await;
                    }
                    break;
                }
            }
        }

        debug!(generation, "Bus worker exited");
    }

    async fn run_listen_cycle(self: Arc<Self>, generation: u64) {
        let previous = {
            let mut shared = self.shared.lock();
            let session = &mut shared.session;
            if !session.running || session.generation != generation {
                return;
            }
            let previous = session.last_processed_signature;
            session.last_processed_signature = session.pending_signature.take();
            previous
        };

        let acquisition = match self.pipeline.acquire_blocking().await {
            Ok(acquisition) => acquisition,
            Err(e) => {
                warn!(error = %e, "Acquisition failed, DM1 stays eligible");
                {
                    let mut shared = self.shared.lock();
                    let session = &mut shared.session;
                    if session.generation != generation {
                        return;
                    }
                    session.last_processed_signature = previous;
                    session.acquisition_scheduled = false;
                    self.publish(session);
                }
                self.emit(SchedulerEvent::AcquisitionFailed {
                    index: None,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let result = acquisition.result;
        let frame = encode_response(&result, self.config.listen.response_source_address);
        if let Err(e) = self.transport.send(&frame).await {
            error!(error = %e, "Failed to send FF99 response, stopping session");
            // shutdown cancels the settle timer, which is this task
            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                inner
                    .shutdown(StopReason::TransportFailure(e.to_string()))
                    .await;
            });
            return;
        }

        let counter = {
            let mut shared = self.shared.lock();
            let session = &mut shared.session;
            if session.generation != generation {
                return;
            }
            session.message_counter += 1;
            session.acquisition_scheduled = false;
            self.publish(session);
            session.message_counter
        };

        info!(
            counter,
            spn = ?result.spn,
            fmi = ?result.fmi,
            lamp = %result.lamp(),
            frame = %frame,
            "FF99 response sent"
        );
        self.emit(SchedulerEvent::ResponseSent {
            counter,
            frame,
            result,
        });
    }

    async fn run_send_cycle(self: Arc<Self>, generation: u64, index: usize) {
        {
            let shared = self.shared.lock();
            let session = &shared.session;
            if !session.running
                || session.generation != generation
                || session.current_index != index
            {
                debug!(index, "Stale acquisition skipped");
                return;
            }
        }

        let acquisition = match self.pipeline.acquire_blocking().await {
            Ok(acquisition) => acquisition,
            Err(e) => {
                warn!(index, error = %e, "Acquisition failed, entry left to time out");
                {
                    let mut shared = self.shared.lock();
                    let session = &mut shared.session;
                    if session.generation != generation || session.current_index != index {
                        return;
                    }
                    session.acquisition_scheduled = false;
                    self.publish(session);
                }
                self.emit(SchedulerEvent::AcquisitionFailed {
                    index: Some(index),
                    reason: e.to_string(),
                });
                return;
            }
        };

        let outcome = {
            let mut shared = self.shared.lock();
            let Shared { session, run } = &mut *shared;
            if session.generation != generation || session.current_index != index {
                debug!(index, "Entry advanced during acquisition, reading discarded");
                return;
            }
            let Some(run) = run.as_mut() else {
                return;
            };
            let Some(entry) = run.entries.get_mut(index) else {
                return;
            };

            let outcome = run.engine.verify(
                index,
                entry,
                Observation {
                    result: acquisition.result,
                    corrected: acquisition.corrected,
                    frame: None,
                },
            );
            session.last_processed_index = Some(index);
            session.current_index = index + 1;
            session.acquisition_scheduled = false;
            self.publish(session);
            outcome
        };

        let (matched, failure) = match outcome {
            Outcome::Match => (true, None),
            Outcome::Mismatch(record) => (false, Some(record)),
        };

        // The sink may do file I/O; it runs off the session lock and off the runtime
        if let Some(record) = &failure {
            let sink = Arc::clone(&self.sink);
            let record = record.clone();
            let frame = acquisition.frame;
            let saved = tokio::task::spawn_blocking(move || {
                sink.on_failure(&record, Some(&frame));
            })
            .await;
            if let Err(e) = saved {
                error!(index, error = %e, "Failure artifact task panicked");
            }
        }

        self.emit(SchedulerEvent::Verified {
            index,
            matched,
            failure,
        });
    }

    async fn shutdown(&self, reason: StopReason) {
        let _guard = self.lifecycle.lock().await;

        let was_running = {
            let mut shared = self.shared.lock();
            let session = &mut shared.session;
            let was_running = session.running;
            if was_running {
                session.running = false;
                session.generation += 1;
            }
            session.acquisition_scheduled = false;
            session.pending_signature = None;
            self.publish(session);
            was_running
        };

        self.timer.cancel();
        // the bus worker sees the generation change on its next poll
        drop(self.worker.lock().take());
        self.transport.close().await;

        if was_running {
            info!(reason = %reason, "Session stopped");
            self.emit(SchedulerEvent::Stopped { reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{ScriptedDisplay, ScriptedReading};
    use crate::transport::MockCanTransport;
    use dtcv_core::{encode_dm1, Lamp};
    use std::time::Duration;

    fn setup() -> (AcquisitionScheduler, Arc<MockCanTransport>, Arc<ScriptedDisplay>) {
        let config = BenchConfig::default();
        let transport = Arc::new(MockCanTransport::new());
        let display = Arc::new(ScriptedDisplay::new(&config.recognition));
        let pipeline = Arc::new(AcquisitionPipeline::new(
            display.clone(),
            display.clone(),
            config.recognition.clone(),
        ));
        let scheduler = AcquisitionScheduler::new(config, transport.clone(), pipeline);
        (scheduler, transport, display)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_opens_transport() {
        let (scheduler, transport, _) = setup();
        scheduler.start_listen().await.unwrap();

        assert!(transport.is_open());
        let snapshot = scheduler.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.mode, Mode::Listen);
        assert_eq!(snapshot.generation, 1);

        assert_eq!(
            scheduler.start_listen().await.unwrap_err(),
            SchedulerError::AlreadyRunning
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_transport_fails() {
        let (scheduler, transport, _) = setup();
        transport.set_fail_open(true);

        let err = scheduler.start_listen().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Transport(_)));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_frame_filters() {
        let (scheduler, _, _) = setup();
        let dm1 = encode_dm1(520313, 14, Lamp::Amber, 0x00);

        // not running
        assert!(!scheduler.handle_frame(&dm1));

        scheduler.start_listen().await.unwrap();

        // own source address
        assert!(!scheduler.handle_frame(&encode_dm1(520313, 14, Lamp::Amber, 0x27)));
        // not a DM1
        let ff99 = dtcv_core::encode_ff99(520313, 14, true, false, 0x00);
        assert!(!scheduler.handle_frame(&ff99));

        assert!(scheduler.handle_frame(&dm1));
        // already scheduled
        assert!(!scheduler.handle_frame(&encode_dm1(100, 1, Lamp::Red, 0x00)));
        assert!(scheduler.snapshot().acquisition_scheduled);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_for_index_guards() {
        let (scheduler, _, display) = setup();
        let entries = vec![
            DtcEntry::new(100, 1, Lamp::None, 0).unwrap(),
            DtcEntry::new(190, 2, Lamp::Amber, 0).unwrap(),
        ];
        display.push(ScriptedReading::matching(&entries[0]));
        scheduler.start_send(entries).await.unwrap();

        assert!(!scheduler.schedule_for_index(1));
        assert!(scheduler.schedule_for_index(0));
        assert!(!scheduler.schedule_for_index(0));

        tokio::time::sleep(Duration::from_secs(36)).await;
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.current_index, 1);
        assert!(!snapshot.acquisition_scheduled);
        // processed entries cannot be rescheduled
        assert!(!scheduler.schedule_for_index(0));

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_advance_only_for_current_entry() {
        let (scheduler, _, _) = setup();
        let entries = vec![
            DtcEntry::new(100, 1, Lamp::None, 0).unwrap(),
            DtcEntry::new(190, 2, Lamp::Amber, 0).unwrap(),
        ];
        scheduler.start_send(entries).await.unwrap();

        assert!(!scheduler.force_advance(1));
        assert!(scheduler.force_advance(0));
        assert!(!scheduler.force_advance(0));
        assert_eq!(scheduler.snapshot().current_index, 1);
        assert!(scheduler.entries()[0].error_found);

        let report = scheduler.report(false).unwrap();
        assert_eq!(report.timed_out, 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_send_rejects_empty() {
        let (scheduler, _, _) = setup();
        assert_eq!(
            scheduler.start_send(Vec::new()).await.unwrap_err(),
            SchedulerError::EmptyEntrySet
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_failure_stops_session() {
        let (scheduler, transport, _) = setup();
        scheduler
            .start_send(vec![DtcEntry::new(100, 1, Lamp::None, 0).unwrap()])
            .await
            .unwrap();

        let frame = encode_dm1(100, 1, Lamp::None, 0);
        scheduler.transmit(&frame).await.unwrap();
        assert_eq!(scheduler.snapshot().message_counter, 1);

        transport.set_fail_send(true);
        assert!(matches!(
            scheduler.transmit(&frame).await,
            Err(SchedulerError::Transport(_))
        ));
        assert!(!scheduler.is_running());
        assert!(!transport.is_open());
        assert_eq!(
            scheduler.transmit(&frame).await.unwrap_err(),
            SchedulerError::NotRunning
        );
    }
}

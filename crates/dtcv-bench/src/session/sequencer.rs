//! DTC test sequencer
//!
//! Walks a list of entries in send mode. For each entry it transmits the
//! DM1 frame once per transmit interval, arms the scheduler's settle timer
//! once, and waits for the verification cycle to advance the session. If
//! the maximum window passes first, the entry is recorded as timed out and
//! the sequencer moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dtcv_core::{encode_dm1, CanFrame, DtcEntry, RunReport};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AcquisitionScheduler, SchedulerError, SchedulerEvent, SessionSnapshot};
use crate::config::TimingConfig;

/// Remaining settle units at which the countdown is logged
pub const COUNTDOWN_MILESTONES: &[u32] = &[35, 20, 10, 5, 4, 3, 2, 1];

pub struct DtcSequencer {
    scheduler: Arc<AcquisitionScheduler>,
    paused: AtomicBool,
}

impl DtcSequencer {
    pub fn new(scheduler: Arc<AcquisitionScheduler>) -> Self {
        Self {
            scheduler,
            paused: AtomicBool::new(false),
        }
    }

    pub fn scheduler(&self) -> &Arc<AcquisitionScheduler> {
        &self.scheduler
    }

    /// Suspend DM1 transmission. The current index and any pending
    /// acquisition are left alone, and no new entry starts while paused.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Sequence paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Sequence resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop the run; `run` returns a report with status `Stopped`
    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    /// Run every entry in order and return the final report
    pub async fn run(&self, entries: Vec<DtcEntry>) -> Result<RunReport, SchedulerError> {
        let total = entries.len();
        self.scheduler.start_send(entries).await?;

        let timing = self.scheduler.config().timing.clone();
        let mut snapshots = self.scheduler.watch();
        info!(entries = total, "DTC sequence started");

        let mut completed = false;
        loop {
            let snapshot = self.scheduler.snapshot();
            if !snapshot.running {
                break;
            }
            let index = snapshot.current_index;
            if index >= total {
                completed = true;
                break;
            }

            if self.is_paused() {
                tokio::select! {
                    _ = tokio::time::sleep(timing.transmit_interval()) => {}
                    _ = wait_for(&mut snapshots, |s| !s.running) => {}
                }
                continue;
            }

            let Some(entry) = self.scheduler.entry(index) else {
                break;
            };
            self.run_entry(index, total, &entry, &timing, &mut snapshots)
                .await?;

            if index + 1 < total {
                tokio::select! {
                    _ = tokio::time::sleep(timing.inter_entry_pause()) => {}
                    _ = wait_for(&mut snapshots, |s| !s.running) => {}
                }
            }
        }

        if completed {
            self.scheduler.finish().await;
        }

        let report = self
            .scheduler
            .report(!completed)
            .ok_or(SchedulerError::NotRunning)?;

        info!(status = %report.status, "{}", report.summary_line());
        self.scheduler.emit(SchedulerEvent::SequenceCompleted {
            status: report.status,
            passed: report.passed,
            total: report.total_entries,
        });
        Ok(report)
    }

    async fn run_entry(
        &self,
        index: usize,
        total: usize,
        entry: &DtcEntry,
        timing: &TimingConfig,
        snapshots: &mut watch::Receiver<SessionSnapshot>,
    ) -> Result<(), SchedulerError> {
        let frame = encode_dm1(entry.spn, entry.fmi, entry.lamp, entry.source_address);

        info!(
            "Testing DTC {}/{}: SPN={}, FMI={}, LAMP={} ({})",
            index + 1,
            total,
            entry.spn,
            entry.fmi,
            entry.lamp,
            entry.display_code_hex()
        );
        self.scheduler.emit(SchedulerEvent::EntryStarted {
            index,
            total,
            entry: entry.clone(),
        });

        self.scheduler.schedule_for_index(index);

        let started = Instant::now();
        let deadline = started + timing.max_window();
        let mut last_countdown = None;

        loop {
            if Instant::now() >= deadline || !on_entry(&self.scheduler.snapshot(), index) {
                break;
            }

            if self.is_paused() {
                debug!(index, "Paused, DM1 not sent");
            } else if !self.send_dm1(index, &frame).await? {
                break;
            }

            let elapsed_units = (started.elapsed().as_millis() / timing.time_unit_ms as u128) as u32;
            let remaining = timing.settle_units.saturating_sub(elapsed_units);
            if last_countdown != Some(remaining) && COUNTDOWN_MILESTONES.contains(&remaining) {
                last_countdown = Some(remaining);
                info!(dtc = index + 1, "Recognition in {} units", remaining);
                self.scheduler.emit(SchedulerEvent::Countdown {
                    index,
                    remaining_units: remaining,
                });
            }

            let next = (Instant::now() + timing.transmit_interval()).min(deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = wait_for(snapshots, |s| !on_entry(s, index)) => {}
            }
        }

        if self.scheduler.force_advance(index) {
            warn!(
                dtc = index + 1,
                window_units = timing.max_window_units,
                "Recognition timed out, moving to next DTC"
            );
        }
        Ok(())
    }

    /// Send one DM1 for `index`. `Ok(false)` means the session was stopped
    /// concurrently; only transport failures are errors.
    async fn send_dm1(&self, index: usize, frame: &CanFrame) -> Result<bool, SchedulerError> {
        match self.scheduler.transmit(frame).await {
            Ok(()) => Ok(true),
            Err(SchedulerError::NotRunning) => {
                debug!(index, "Session stopped before DM1 send");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn on_entry(snapshot: &SessionSnapshot, index: usize) -> bool {
    snapshot.running && snapshot.current_index == index
}

/// Resolve once the latest snapshot satisfies `done`
async fn wait_for<F>(rx: &mut watch::Receiver<SessionSnapshot>, done: F)
where
    F: Fn(&SessionSnapshot) -> bool,
{
    loop {
        if done(&rx.borrow_and_update()) {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

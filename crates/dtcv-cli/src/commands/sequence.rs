//! Sequence command - verify a list of DTCs against the display

use anyhow::{bail, Context, Result};
use dtcv_bench::{
    create_transport, AcquisitionPipeline, AcquisitionScheduler, BenchConfig, DtcSequencer,
    ScriptedDisplay, ScriptedReading, SchedulerEvent,
};
use dtcv_core::{load_entries, FailureArtifactSink, NoArtifacts, RunReport, RunStatus};
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

use super::{interrupt_flag, read_script, INTERRUPT_POLL};
use crate::artifacts::DirectoryArtifacts;
use crate::output::{FailureRow, OutputContext, OutputFormat};

pub async fn sequence(
    bench: BenchConfig,
    file: &Path,
    script: Option<&Path>,
    report_path: Option<&Path>,
    artifacts: Option<&Path>,
    ctx: &OutputContext,
) -> Result<()> {
    let set = load_entries(file)
        .with_context(|| format!("Failed to load entries: {}", file.display()))?;
    for diag in &set.diagnostics {
        ctx.warn(&format!("line {}: {}", diag.line, diag.message));
    }
    let total = set.len();

    let display = Arc::new(ScriptedDisplay::new(&bench.recognition));
    match script {
        Some(path) => display.extend(read_script(path)?),
        None => {
            ctx.info("No display script given, rehearsing with the expected readings");
            display.extend(set.entries.iter().map(ScriptedReading::matching));
        }
    }

    let sink: Arc<dyn FailureArtifactSink> = match artifacts {
        Some(dir) => Arc::new(DirectoryArtifacts::new(dir, &bench.recognition)?),
        None => Arc::new(NoArtifacts),
    };
    let pipeline = Arc::new(AcquisitionPipeline::new(
        display.clone(),
        display,
        bench.recognition.clone(),
    ));
    let transport = create_transport(&bench.transport).context("Failed to create CAN transport")?;
    let scheduler = Arc::new(AcquisitionScheduler::with_sink(
        bench, transport, pipeline, sink,
    ));
    let sequencer = Arc::new(DtcSequencer::new(scheduler.clone()));

    let mut events = scheduler.subscribe();
    let interrupted = interrupt_flag()?;
    let progress = ctx.progress(total as u64);
    ctx.info(&format!("Testing {} DTCs, press Ctrl+C to stop", total));

    let runner = sequencer.clone();
    let entries = set.entries;
    let mut task = tokio::spawn(async move { runner.run(entries).await });

    let mut stopping = false;
    let result = loop {
        tokio::select! {
            result = &mut task => break result.context("Sequence task failed")?,
            event = events.recv() => {
                if let (Ok(event), Some(pb)) = (event, progress.as_ref()) {
                    track(pb, &event);
                }
            }
            _ = tokio::time::sleep(INTERRUPT_POLL), if !stopping => {
                if interrupted.load(Ordering::SeqCst) {
                    stopping = true;
                    let sequencer = sequencer.clone();
                    tokio::spawn(async move { sequencer.stop().await });
                }
            }
        }
    };

    if let Some(pb) = &progress {
        loop {
            match events.try_recv() {
                Ok(event) => track(pb, &event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        pb.finish_and_clear();
    }

    let report = result.context("Sequence failed")?;

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        ctx.info(&format!("Report written to {}", path.display()));
    }

    print_report(&report, ctx)?;

    match report.status {
        RunStatus::CompletedSuccessfully => Ok(()),
        RunStatus::Stopped => {
            ctx.warn("Sequence stopped before all DTCs were tested");
            Ok(())
        }
        RunStatus::CompletedWithErrors => bail!(
            "{} of {} DTCs failed",
            report.failed,
            report.total_entries
        ),
    }
}

/// Advance the progress bar from scheduler events
fn track(pb: &ProgressBar, event: &SchedulerEvent) {
    match event {
        SchedulerEvent::EntryStarted { index, entry, .. } => {
            pb.set_message(format!(
                "DTC {} (SPN {} FMI {} {})",
                index + 1,
                entry.spn,
                entry.fmi,
                entry.display_code_hex()
            ));
        }
        SchedulerEvent::Countdown {
            index,
            remaining_units,
        } => {
            pb.set_message(format!("DTC {} - reading in {}", index + 1, remaining_units));
        }
        SchedulerEvent::Verified { failure: Some(record), .. } => {
            pb.println(record.to_string());
            pb.inc(1);
        }
        SchedulerEvent::Verified { .. } => pb.inc(1),
        SchedulerEvent::EntryTimedOut { index } => {
            pb.println(format!("DTC {:3}: no reading within the window", index + 1));
            pb.inc(1);
        }
        _ => {}
    }
}

fn print_report(report: &RunReport, ctx: &OutputContext) -> Result<()> {
    let failures: Vec<FailureRow> = report.failures.iter().map(FailureRow::from).collect();

    match ctx.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Csv => ctx.print(&failures),
        OutputFormat::Table => {
            ctx.print_kv(&[
                ("Status", report.status.to_string()),
                ("Result", report.summary_line()),
                ("Compared", report.compared.to_string()),
                ("Failed", report.failed.to_string()),
                ("Timed out", report.timed_out.to_string()),
                (
                    "OCR success",
                    format!("{:.1}%", report.ocr.overall_success_rate),
                ),
                ("Corrections", report.ocr.corrections_applied.to_string()),
            ]);
            if !failures.is_empty() {
                println!();
                ctx.print(&failures);
            }
        }
    }
    Ok(())
}

//! Vector ASC trace parsing and playback

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dtcv_core::CanFrame;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::transport::CanTransport;

const MIN_MESSAGE_PARTS: usize = 10;
const SKIPPED_PREFIXES: &[&str] = &["//", "date ", "base ", "internal ", "Begin ", "End "];
const SKIPPED_MARKERS: &[&str] = &["Status:", "Start of measurement"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Rx,
    Tx,
}

/// One frame line of a trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AscMessage {
    /// Seconds from the start of the measurement
    pub timestamp: f64,
    pub channel: String,
    pub direction: Direction,
    pub frame: CanFrame,
}

/// Parsed trace
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AscTrace {
    pub messages: Vec<AscMessage>,
    /// Frame lines dropped because their payload is not 8 bytes
    pub skipped: usize,
}

impl AscTrace {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Trace length in seconds
    pub fn duration(&self) -> f64 {
        match (self.messages.first(), self.messages.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}

enum Line {
    Ignored,
    Message(AscMessage),
    WrongLength(usize),
}

fn parse_line(line: &str) -> Line {
    let line = line.trim();
    if line.is_empty()
        || SKIPPED_PREFIXES.iter().any(|p| line.starts_with(p))
        || SKIPPED_MARKERS.iter().any(|m| line.contains(m))
    {
        return Line::Ignored;
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < MIN_MESSAGE_PARTS {
        return Line::Ignored;
    }

    let Ok(timestamp) = parts[0].parse::<f64>() else {
        return Line::Ignored;
    };

    let (id, extended) = match parts[2].strip_suffix('x') {
        Some(id) => (id, true),
        None => (parts[2], false),
    };
    let Ok(arbitration_id) = u32::from_str_radix(id, 16) else {
        return Line::Ignored;
    };

    let direction = match parts[3] {
        "Rx" => Direction::Rx,
        "Tx" => Direction::Tx,
        _ => return Line::Ignored,
    };
    if parts[4] != "d" {
        return Line::Ignored;
    }
    let Ok(dlc) = parts[5].parse::<usize>() else {
        return Line::Ignored;
    };

    let data: Vec<u8> = parts[6..]
        .iter()
        .take(dlc)
        .filter_map(|b| u8::from_str_radix(b, 16).ok())
        .collect();

    match CanFrame::from_slice(arbitration_id, extended, &data) {
        Some(frame) => Line::Message(AscMessage {
            timestamp,
            channel: parts[1].to_string(),
            direction,
            frame,
        }),
        None => Line::WrongLength(data.len()),
    }
}

/// Parse the text of an ASC trace
pub fn parse_asc(content: &str) -> AscTrace {
    let mut trace = AscTrace::default();
    for (n, line) in content.lines().enumerate() {
        match parse_line(line) {
            Line::Ignored => {}
            Line::Message(message) => trace.messages.push(message),
            Line::WrongLength(len) => {
                debug!(line = n + 1, len, "Skipping non 8-byte frame");
                trace.skipped += 1;
            }
        }
    }
    info!(
        messages = trace.messages.len(),
        skipped = trace.skipped,
        "Parsed ASC trace"
    );
    trace
}

/// Read and parse an ASC trace file
pub fn load_asc(path: &Path) -> std::io::Result<AscTrace> {
    let bytes = std::fs::read(path)?;
    Ok(parse_asc(&String::from_utf8_lossy(&bytes)))
}

/// Result of one playback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackSummary {
    pub sent: u64,
    pub failed: u64,
    /// Complete passes over the trace
    pub passes: u64,
    pub stopped: bool,
}

/// Replays a trace onto a transport with the recorded timing
pub struct TracePlayer {
    transport: Arc<dyn CanTransport>,
    stop: Arc<AtomicBool>,
}

impl TracePlayer {
    pub fn new(transport: Arc<dyn CanTransport>) -> Self {
        Self {
            transport,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends playback before the next message when set
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Play `trace` on an open transport, repeating while `looped` is set.
    ///
    /// Send failures are logged and counted; playback continues.
    pub async fn play(&self, trace: &AscTrace, looped: bool) -> PlaybackSummary {
        let mut summary = PlaybackSummary::default();
        if trace.is_empty() {
            return summary;
        }
        self.stop.store(false, Ordering::SeqCst);
        info!(messages = trace.len(), looped, "Starting ASC playback");

        'outer: loop {
            let mut previous: Option<f64> = None;
            for message in &trace.messages {
                if self.stopped() {
                    summary.stopped = true;
                    break 'outer;
                }

                if let Some(previous) = previous {
                    let wait = (message.timestamp - previous).max(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                previous = Some(message.timestamp);

                match self.transport.send(&message.frame).await {
                    Ok(()) => summary.sent += 1,
                    Err(e) => {
                        warn!(frame = %message.frame, error = %e, "ASC frame not sent");
                        summary.failed += 1;
                    }
                }
            }

            summary.passes += 1;
            if !looped || self.stopped() {
                summary.stopped = self.stopped();
                break;
            }
            debug!(passes = summary.passes, "Restarting ASC trace");
        }

        info!(
            sent = summary.sent,
            failed = summary.failed,
            passes = summary.passes,
            "ASC playback finished"
        );
        summary
    }
}

//! Manual DTC transmission
//!
//! Sends one operator-entered DM1, once or repeatedly, outside of a
//! sequencer run. Values are range-checked before anything reaches the bus.

use std::time::Duration;

use dtcv_core::codec::checked_encode_dm1;
use dtcv_core::{CanFrame, CodecError, Lamp};
use thiserror::Error;
use tracing::info;

use crate::config::{ManualConfig, TimingConfig};
use crate::transport::{CanTransport, TransportError};

#[derive(Debug, Error, PartialEq)]
pub enum ManualSendError {
    #[error("invalid DTC: {0}")]
    Codec(#[from] CodecError),

    #[error("source address {0} is outside 0..=255")]
    SourceAddressOutOfRange(u32),

    #[error("repeat count must be at least 1")]
    ZeroRepeat,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// How often a manual DTC is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Times { count: u32, interval: Duration },
}

impl Repeat {
    /// Repeat mode using the configured count and spacing
    pub fn from_config(manual: &ManualConfig, timing: &TimingConfig) -> Self {
        Repeat::Times {
            count: manual.repeat_count,
            interval: timing.units(manual.repeat_interval_units),
        }
    }
}

/// Validate operator input and build the DM1 frame
pub fn build_manual_frame(
    spn: u32,
    fmi: u32,
    lamp: Lamp,
    source_address: u32,
) -> Result<CanFrame, ManualSendError> {
    let source_address = u8::try_from(source_address)
        .map_err(|_| ManualSendError::SourceAddressOutOfRange(source_address))?;
    Ok(checked_encode_dm1(spn, fmi, lamp, source_address)?)
}

/// Send `frame` on an open transport. Returns the number of frames sent.
pub async fn send_manual(
    transport: &dyn CanTransport,
    frame: &CanFrame,
    repeat: Repeat,
) -> Result<u32, ManualSendError> {
    let (count, interval) = match repeat {
        Repeat::Once => (1, Duration::ZERO),
        Repeat::Times { count: 0, .. } => return Err(ManualSendError::ZeroRepeat),
        Repeat::Times { count, interval } => (count, interval),
    };

    for n in 1..=count {
        transport.send(frame).await?;
        info!(frame = %frame, n, count, "Manual DTC sent");
        if n < count {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(count)
}

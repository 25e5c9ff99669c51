//! Raw SocketCAN transport for J1939 frames

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dtcv_core::CanFrame;
use parking_lot::Mutex;
use socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId,
};

use crate::config::SocketCanConfig;
use crate::transport::{CanTransport, TransportError};

/// Upper bound on a blocked write when the TX queue is full
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw CAN socket on one interface
///
/// The socket is blocking; reads wait on the kernel with a read timeout
/// instead of polling. Each call clones the socket handle out of the lock,
/// so a pending read never holds up a send or a close.
pub struct SocketCanTransport {
    interface: String,
    socket: Mutex<Option<Arc<CanSocket>>>,
}

impl SocketCanTransport {
    pub fn new(config: &SocketCanConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            socket: Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn handle(&self) -> Result<Arc<CanSocket>, TransportError> {
        self.socket
            .lock()
            .clone()
            .ok_or(TransportError::ConnectionClosed)
    }
}

fn from_raw(raw: &RawFrame) -> Option<CanFrame> {
    let (id, extended) = match EmbeddedFrame::id(raw) {
        Id::Extended(id) => (id.as_raw(), true),
        Id::Standard(id) => (id.as_raw() as u32, false),
    };
    let frame = CanFrame::from_slice(id, extended, EmbeddedFrame::data(raw));
    if frame.is_none() {
        tracing::trace!(id, "Skipping frame without 8 data bytes");
    }
    frame
}

fn to_raw(frame: &CanFrame) -> Result<RawFrame, TransportError> {
    let raw = if frame.extended {
        let id = ExtendedId::new(frame.arbitration_id).ok_or_else(|| {
            TransportError::SendFailed(format!(
                "Invalid extended CAN ID: 0x{:X}",
                frame.arbitration_id
            ))
        })?;
        RawFrame::new(id, &frame.data)
    } else {
        let id = StandardId::new(frame.arbitration_id as u16).ok_or_else(|| {
            TransportError::SendFailed(format!(
                "Invalid standard CAN ID: 0x{:X}",
                frame.arbitration_id
            ))
        })?;
        RawFrame::new(id, &frame.data)
    };
    raw.ok_or_else(|| TransportError::SendFailed("Invalid CAN frame".to_string()))
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    async fn open(&self) -> Result<(), TransportError> {
        let socket = CanSocket::open(&self.interface).map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to open raw CAN socket on {}: {}",
                self.interface, e
            ))
        })?;

        socket.set_nonblocking(false).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set blocking mode: {}", e))
        })?;
        socket.set_write_timeout(WRITE_TIMEOUT).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set write timeout: {}", e))
        })?;

        *self.socket.lock() = Some(Arc::new(socket));
        tracing::info!(interface = %self.interface, "SocketCAN transport opened");
        Ok(())
    }

    async fn close(&self) {
        if self.socket.lock().take().is_some() {
            tracing::info!(interface = %self.interface, "SocketCAN transport closed");
        }
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let raw = to_raw(frame)?;
        let socket = self.handle()?;

        tokio::task::spawn_blocking(move || {
            socket
                .write_frame(&raw)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("Task join error: {}", e)))?
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        let socket = self.handle()?;

        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            loop {
                // a zero SO_RCVTIMEO would block forever
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                socket
                    .set_read_timeout(remaining)
                    .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

                match socket.read_frame() {
                    Ok(raw) => {
                        if let Some(frame) = from_raw(&raw) {
                            return Ok(Some(frame));
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        return Ok(None);
                    }
                    Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
                }
            }
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("Task join error: {}", e)))?
    }

    fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtcv_core::{encode_dm1, Lamp};

    #[test]
    fn test_frame_conversion() {
        let frame = encode_dm1(520313, 14, Lamp::Amber, 0x27);
        let raw = to_raw(&frame).unwrap();
        assert_eq!(from_raw(&raw), Some(frame));

        let standard = CanFrame::from_slice(0x123, false, &[0; 8]).unwrap();
        assert_eq!(from_raw(&to_raw(&standard).unwrap()), Some(standard));
    }

    #[test]
    fn test_short_frame_skipped() {
        let id = ExtendedId::new(0x18FECA00).unwrap();
        let raw = RawFrame::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(from_raw(&raw), None);
    }

    #[test]
    fn test_closed_transport() {
        let transport = SocketCanTransport::new(&SocketCanConfig::default());
        assert!(!transport.is_open());
        assert!(matches!(
            transport.handle(),
            Err(TransportError::ConnectionClosed)
        ));
    }
}

//! CAN transport trait

use std::time::Duration;

use async_trait::async_trait;
use dtcv_core::CanFrame;

use super::TransportError;

/// A CAN bus connection exclusively owned by one scheduler
///
/// `send` and `receive` fail with [`TransportError::ConnectionClosed`] until
/// `open` succeeds and again after `close`.
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Acquire the bus
    async fn open(&self) -> Result<(), TransportError>;

    /// Release the bus; closing a closed transport is a no-op
    async fn close(&self);

    /// Transmit one frame
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next 8-byte frame
    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError>;

    fn is_open(&self) -> bool;
}

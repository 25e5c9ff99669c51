//! CAN transport layer
//!
//! - SocketCAN adapter for raw CAN frames (Linux only)
//! - Mock adapter for tests and offline rehearsal

mod adapter;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::CanTransport;
pub use error::TransportError;
pub use mock::MockCanTransport;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a transport based on configuration. The transport starts closed.
pub fn create_transport(config: &TransportConfig) -> Result<Arc<dyn CanTransport>, TransportError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        TransportConfig::SocketCan(cfg) => Ok(Arc::new(socketcan::SocketCanTransport::new(cfg))),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        TransportConfig::SocketCan(_) => Err(TransportError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        TransportConfig::Mock => Ok(Arc::new(MockCanTransport::new())),
    }
}

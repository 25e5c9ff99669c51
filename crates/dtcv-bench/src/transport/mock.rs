//! Mock CAN transport for testing

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dtcv_core::CanFrame;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, Mutex};

use super::{CanTransport, TransportError};

/// In-process bus: frames injected by a test are received, sent frames are recorded
pub struct MockCanTransport {
    open: AtomicBool,
    fail_open: AtomicBool,
    fail_send: AtomicBool,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    inbound_tx: mpsc::UnboundedSender<CanFrame>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<CanFrame>>,
    sent: RwLock<Vec<CanFrame>>,
    sent_tx: broadcast::Sender<CanFrame>,
}

impl Default for MockCanTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCanTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, _) = broadcast::channel(256);
        Self {
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            sent: RwLock::new(Vec::new()),
            sent_tx,
        }
    }

    /// Queue a frame as if another node had sent it
    pub fn inject(&self, frame: CanFrame) {
        let _ = self.inbound_tx.send(frame);
    }

    /// Frames transmitted so far
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.read().clone()
    }

    /// Sent frames with the given PGN
    pub fn sent_with_pgn(&self, pgn: u32) -> Vec<CanFrame> {
        self.sent
            .read()
            .iter()
            .filter(|f| f.pgn() == pgn)
            .copied()
            .collect()
    }

    /// Notifications for each transmitted frame
    pub fn subscribe_sent(&self) -> broadcast::Receiver<CanFrame> {
        self.sent_tx.subscribe()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CanTransport for MockCanTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "mock adapter unavailable".to_string(),
            ));
        }
        self.open.store(true, Ordering::SeqCst);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("mock send failure".to_string()));
        }
        self.sent.write().push(*frame);
        let _ = self.sent_tx.send(*frame);
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(frame) => Ok(frame),
            Err(_) => Ok(None),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

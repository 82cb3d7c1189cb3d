//! Mock CAN transport for testing
//!
//! Frames sent by a session are recorded and handed to an optional responder
//! closure; whatever frames the responder returns are queued for the next
//! `recv_frame`. Tests can also inject frames directly (periodic DAQ data).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{CanFrame, CanTransport};

type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

struct Inner {
    open: AtomicBool,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    fail_open: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<CanFrame>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanFrame>>,
    sent: Mutex<Vec<CanFrame>>,
    responder: Mutex<Option<Responder>>,
}

/// Mock CAN transport; clones share the same state
#[derive(Clone)]
pub struct MockCanTransport {
    inner: Arc<Inner>,
}

impl Default for MockCanTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCanTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                open: AtomicBool::new(false),
                open_count: AtomicUsize::new(0),
                close_count: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
            }),
        }
    }

    /// Create a mock whose sent frames are answered by `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&CanFrame) -> Vec<CanFrame> + Send + 'static,
    {
        let mock = Self::new();
        mock.set_responder(responder);
        mock
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&CanFrame) -> Vec<CanFrame> + Send + 'static,
    {
        *self.inner.responder.lock() = Some(Box::new(responder));
    }

    /// Queue a frame for the next `recv_frame`
    pub fn inject(&self, id: u32, data: &[u8]) {
        let _ = self.inner.inbound_tx.send(CanFrame {
            id,
            data: data.to_vec(),
            timestamp: Instant::now(),
        });
    }

    /// Make the next `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// All frames sent so far
    pub fn sent(&self) -> Vec<CanFrame> {
        self.inner.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.inner.sent.lock().clear();
    }

    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CanTransport for MockCanTransport {
    fn open(&self, channel: &str, _bitrate: u32) -> Result<(), TransportError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed {
                channel: channel.to_string(),
                reason: "mock open failure".to_string(),
            });
        }
        self.inner.open.store(true, Ordering::SeqCst);
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, id: u32, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let frame = CanFrame::new(id, data)?;
        tracing::debug!(id = format!("0x{:X}", id), data = %hex::encode_upper(data), "Mock transport: sent frame");
        self.inner.sent.lock().push(frame.clone());

        let replies = match self.inner.responder.lock().as_mut() {
            Some(responder) => responder(&frame),
            None => Vec::new(),
        };
        for reply in replies {
            let _ = self.inner.inbound_tx.send(reply);
        }
        Ok(())
    }

    async fn recv_frame(&self, timeout: Duration) -> Result<CanFrame, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let mut rx = self.inner.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn error_text(&self, code: i32) -> String {
        format!("mock status {}", code)
    }
}

/// Build a reply frame for a responder closure
pub fn reply(id: u32, data: &[u8]) -> CanFrame {
    CanFrame {
        id,
        data: data.to_vec(),
        timestamp: Instant::now(),
    }
}

//! In-memory test doubles for stream and transport code.
//!
//! `memory_stream()` gives a plugin-side source/sink pair wired to a core-side
//! peer, without any sockets. `RecordingSender` and `ChannelReceiver` stand in
//! for a bound stream and a transport receiver.

use crate::models::SimMessage;
use crate::stream::{Envelope, EnvelopeSink, EnvelopeSource, StreamSender};
use crate::transport::TransportReceiver;
use crate::{Result, SimError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Plugin-facing end of an in-memory stream.
pub struct MemoryStreamEnd {
    pub source: MemorySource,
    pub sink: Arc<dyn EnvelopeSink>,
}

/// Core-facing end of an in-memory stream.
pub struct MemoryPeer {
    to_plugin: Option<mpsc::UnboundedSender<Result<Envelope>>>,
    from_plugin: mpsc::UnboundedReceiver<Envelope>,
}

/// Build a connected in-memory stream.
pub fn memory_stream() -> (MemoryStreamEnd, MemoryPeer) {
    let (to_plugin, plugin_rx) = mpsc::unbounded_channel();
    let (plugin_tx, from_plugin) = mpsc::unbounded_channel();

    let end = MemoryStreamEnd {
        source: MemorySource { rx: plugin_rx },
        sink: Arc::new(MemorySink { tx: plugin_tx }),
    };
    let peer = MemoryPeer {
        to_plugin: Some(to_plugin),
        from_plugin,
    };
    (end, peer)
}

impl MemoryPeer {
    /// Deliver an envelope to the plugin side.
    pub fn send(&self, envelope: Envelope) {
        if let Some(tx) = &self.to_plugin {
            let _ = tx.send(Ok(envelope));
        }
    }

    /// Make the plugin side's next read fail with a transport error.
    pub fn inject_error(&self, error: SimError) {
        if let Some(tx) = &self.to_plugin {
            let _ = tx.send(Err(error));
        }
    }

    /// Close the core-to-plugin direction (clean end-of-stream).
    pub fn close(&mut self) {
        self.to_plugin = None;
    }

    /// Next envelope written by the plugin side, `None` once it is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.from_plugin.recv().await
    }

    /// Everything the plugin side has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.from_plugin.try_recv() {
            out.push(envelope);
        }
        out
    }
}

pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Envelope>>,
}

#[async_trait::async_trait]
impl EnvelopeSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Envelope>> {
        match self.rx.recv().await {
            Some(Ok(envelope)) => Ok(Some(envelope)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait::async_trait]
impl EnvelopeSink for MemorySink {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.tx.send(envelope).map_err(|_| SimError::StreamClosed)
    }
}

/// A [`StreamSender`] that records everything sent through it.
pub struct RecordingSender {
    component_id: String,
    sent: Mutex<Vec<SimMessage>>,
    notify: Notify,
    fail: AtomicBool,
}

impl RecordingSender {
    pub fn new(component_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            component_id: component_id.into(),
            sent: Mutex::new(Vec::new()),
            notify: Notify::new(),
            fail: AtomicBool::new(false),
        })
    }

    /// Make subsequent sends fail (after recording them).
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SimMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.message_id).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }

    /// Wait until at least `count` messages were recorded. Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.sent().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait::async_trait]
impl StreamSender for RecordingSender {
    async fn send(&self, message: SimMessage) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        self.notify.notify_waiters();
        if self.fail.load(Ordering::SeqCst) {
            return Err(SimError::StreamClosed);
        }
        Ok(())
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }
}

/// A [`TransportReceiver`] fed by hand through an mpsc queue.
pub struct ChannelReceiver {
    tx: Mutex<Option<mpsc::Sender<SimMessage>>>,
    rx: Mutex<Option<mpsc::Receiver<SimMessage>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    start_error: Option<String>,
    stop_error: Option<String>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ChannelReceiver {
    pub fn new() -> Arc<Self> {
        Self::build(None, None)
    }

    pub fn failing_start(message: &str) -> Arc<Self> {
        Self::build(Some(message.to_string()), None)
    }

    pub fn failing_stop(message: &str) -> Arc<Self> {
        Self::build(None, Some(message.to_string()))
    }

    fn build(start_error: Option<String>, stop_error: Option<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(crate::config::TransportConfig::INBOUND_QUEUE_CAPACITY);
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            start_error,
            stop_error,
            cancel: Mutex::new(None),
        })
    }

    /// Simulate a message arriving from the transport.
    pub async fn push(&self, message: SimMessage) -> bool {
        let tx = self.tx.lock().ok().and_then(|tx| tx.clone());
        match tx {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// The token handed to `start`, if started.
    pub fn start_token(&self) -> Option<CancellationToken> {
        self.cancel.lock().ok().and_then(|c| c.clone())
    }
}

#[async_trait::async_trait]
impl TransportReceiver for ChannelReceiver {
    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = Some(cancel);
        }
        match &self.start_error {
            Some(message) => Err(SimError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        // Dropping the producer closes the inbound queue.
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        match &self.stop_error {
            Some(message) => Err(SimError::Other(message.clone())),
            None => Ok(()),
        }
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<SimMessage>> {
        self.rx.lock().ok().and_then(|mut rx| rx.take())
    }
}

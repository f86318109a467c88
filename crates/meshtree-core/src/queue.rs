//! Serialization queue.
//!
//! Producers enqueue messages through a [`QueueHandle`]; a single worker task
//! owns the [`Dispatcher`] and handles them strictly in arrival order. A
//! panicking handler is caught and logged so the queue keeps draining.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatch::Dispatcher;
use crate::envelope::Envelope;
use crate::error::{BridgeError, Result};

/// Message as received from the transport, base topic stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

enum QueueItem {
    Raw(RawMessage),
    Envelope(Envelope),
    Connection(bool),
    Flush(oneshot::Sender<()>),
    Close,
}

/// Cloneable producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueItem>,
}

impl QueueHandle {
    async fn send(&self, item: QueueItem) -> Result<()> {
        self.tx.send(item).await.map_err(|_| BridgeError::QueueClosed)
    }

    /// Enqueue a raw transport message.
    pub async fn submit(&self, message: RawMessage) -> Result<()> {
        self.send(QueueItem::Raw(message)).await
    }

    /// Enqueue an already decoded envelope.
    pub async fn submit_envelope(&self, envelope: Envelope) -> Result<()> {
        self.send(QueueItem::Envelope(envelope)).await
    }

    /// Record a transport connectivity change, in order with messages.
    pub async fn set_connected(&self, connected: bool) -> Result<()> {
        self.send(QueueItem::Connection(connected)).await
    }

    /// Wait until everything enqueued before this call has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(QueueItem::Flush(tx)).await?;
        rx.await.map_err(|_| BridgeError::QueueClosed)
    }
}

/// The queue worker and its handle.
pub struct MessageQueue {
    handle: QueueHandle,
    worker: JoinHandle<Dispatcher>,
}

impl MessageQueue {
    /// Spawn the worker. It starts the dispatcher's session before taking
    /// the first message.
    pub fn spawn(dispatcher: Dispatcher, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(dispatcher, rx));
        Self {
            handle: QueueHandle { tx },
            worker,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Stop accepting work, let the current tail finish, end the session
    /// and hand the dispatcher back.
    pub async fn shutdown(self) -> Result<Dispatcher> {
        // A closed channel means the worker is already gone; join below reports it.
        let _ = self.handle.send(QueueItem::Close).await;
        self.worker.await.map_err(|e| {
            error!(error = %e, "Queue worker failed");
            BridgeError::QueueClosed
        })
    }
}

async fn run_worker(mut dispatcher: Dispatcher, mut rx: mpsc::Receiver<QueueItem>) -> Dispatcher {
    if let Err(e) = dispatcher.start_session().await {
        error!(error = %e, "Failed to prepare session");
    }

    let mut handled: u64 = 0;
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Raw(message) => {
                let outcome = AssertUnwindSafe(dispatcher.handle_raw(&message.topic, &message.payload))
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    error!(topic = %message.topic, "Message handler panicked");
                }
                handled += 1;
            }
            QueueItem::Envelope(envelope) => {
                let topic = envelope.topic.clone();
                let outcome = AssertUnwindSafe(dispatcher.handle(envelope))
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    error!(topic = %topic, "Message handler panicked");
                }
                handled += 1;
            }
            QueueItem::Connection(connected) => {
                debug!(connected, "Transport connectivity changed");
                dispatcher.set_connected(connected).await;
            }
            QueueItem::Flush(done) => {
                let _ = done.send(());
            }
            QueueItem::Close => break,
        }
    }

    info!(handled, "Message queue drained");
    dispatcher.end_session().await;
    dispatcher
}

//! The bounded hand-off between the single reader and the single writer.
//!
//! The reader owns the only sender. Closing is idempotent: whichever of the reader's
//! exit paths gets there first drops the sender, every later call is a no-op, and the
//! writer observes end-of-stream exactly once after draining what was buffered.

use tokio::sync::mpsc;
use tracing::debug;

use crate::record::Record;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Create a bounded record channel. `capacity` must be non-zero.
pub fn record_channel(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RecordSender { inner: Some(tx) }, RecordReceiver { inner: rx })
}

/// Returned when the writer has gone away and the record could not be delivered.
#[derive(Debug)]
pub struct ReceiverClosed(pub Record);

pub struct RecordSender {
    inner: Option<mpsc::Sender<Record>>,
}

impl RecordSender {
    /// Send a record, waiting for buffer space when the channel is full.
    pub async fn send(&self, record: Record) -> Result<(), ReceiverClosed> {
        match &self.inner {
            Some(tx) => tx.send(record).await.map_err(|e| ReceiverClosed(e.0)),
            None => Err(ReceiverClosed(record)),
        }
    }

    /// Close the channel. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("record channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

impl Drop for RecordSender {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct RecordReceiver {
    inner: mpsc::Receiver<Record>,
}

impl RecordReceiver {
    /// Wait for the next record. `None` once the sender is closed and the buffer drained.
    pub async fn recv(&mut self) -> Option<Record> {
        self.inner.recv().await
    }

    /// Records buffered and not yet received.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

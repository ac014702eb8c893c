use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::info;
use url::Url;

use crate::{
    channel::RecordReceiver,
    error::SinkError,
    observe::{NotificationEvent, Notifier},
    record::Record,
    route::FileFormat,
};

pub mod file;
pub mod http;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod queue;

pub use file::FileWriter;
pub use queue::{ManagedProducer, ProducerRegistry, ProducerSettings, QueueWriter};

/// Consumes the record channel until it is closed and drained.
///
/// Returns how many records were written. A writer that fails before consuming anything
/// leaves the channel untouched.
#[async_trait]
pub trait RecordWriter: Send {
    async fn write(
        &mut self,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, SinkError>;
}

/// Where records go, as chosen by the sink router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    Stdout,
    Null,
    File { path: PathBuf, format: FileFormat },
    Queue { target: Url },
}

impl SinkConfig {
    pub fn construct(
        &self,
        producers: &ProducerRegistry,
        settings: &ProducerSettings,
    ) -> Result<Box<dyn RecordWriter>, SinkError> {
        match self {
            SinkConfig::Stdout => Ok(Box::new(StreamWriter::new(
                "stdout",
                tokio::io::stdout(),
            ))),
            SinkConfig::Null => Ok(Box::new(NullWriter)),
            SinkConfig::File { path, format } => Ok(Box::new(FileWriter::new(path, *format))),
            SinkConfig::Queue { target } => {
                let producer = producers
                    .get(target.scheme())
                    .ok_or_else(|| SinkError::ProducerUnavailable(target.scheme().to_string()))?;
                Ok(Box::new(QueueWriter::new(
                    target.clone(),
                    producer,
                    settings.clone(),
                )))
            }
        }
    }
}

pub(crate) fn notify_written(notifier: &Notifier, record: &Record) {
    let identity = record.identity();
    notifier.notify(NotificationEvent::RecordWritten {
        data_source: identity.data_source.clone(),
        record_id: identity.record_id.clone(),
    });
}

/// Writes each record as a line to an async byte stream. Used for standard output.
pub struct StreamWriter<W> {
    name: &'static str,
    out: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> StreamWriter<W> {
    pub fn new(name: &'static str, out: W) -> Self {
        Self {
            name,
            out: BufWriter::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    async fn write_line(&mut self, record: &Record) -> std::io::Result<()> {
        self.out.write_all(record.body().as_bytes()).await?;
        self.out.write_all(b"\n").await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RecordWriter for StreamWriter<W> {
    async fn write(
        &mut self,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, SinkError> {
        let mut written = 0;
        while let Some(record) = records.recv().await {
            self.write_line(&record)
                .await
                .map_err(|error| SinkError::Write {
                    destination: self.name.to_string(),
                    written,
                    error,
                })?;
            written += 1;
            notify_written(notifier, &record);
        }

        self.out.flush().await.map_err(|error| SinkError::Write {
            destination: self.name.to_string(),
            written,
            error,
        })?;
        info!(destination = self.name, written, "finished writing");
        Ok(written)
    }
}

/// Drains and counts records without writing them anywhere.
pub struct NullWriter;

#[async_trait]
impl RecordWriter for NullWriter {
    async fn write(
        &mut self,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, SinkError> {
        let mut written = 0;
        while let Some(record) = records.recv().await {
            written += 1;
            notify_written(notifier, &record);
        }
        info!(destination = "null", written, "finished writing");
        Ok(written)
    }
}

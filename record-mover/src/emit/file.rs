use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::info;

use super::{notify_written, RecordWriter};
use crate::{
    channel::RecordReceiver, error::SinkError, observe::Notifier, record::Record,
    route::FileFormat,
};

/// Writes records to a new local file, optionally as a single gzip member.
pub struct FileWriter {
    path: PathBuf,
    format: FileFormat,
}

impl FileWriter {
    pub fn new(path: impl AsRef<Path>, format: FileFormat) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
        }
    }

    fn destination(&self) -> String {
        self.path.display().to_string()
    }

    async fn create(&self) -> Result<File, SinkError> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
            .map_err(|error| match error.kind() {
                io::ErrorKind::AlreadyExists => SinkError::Conflict(self.destination()),
                _ => SinkError::Open {
                    destination: self.destination(),
                    error,
                },
            })
    }
}

// Gzip output is compressed in memory and flushed to the file as it accumulates.
struct LineSink {
    out: BufWriter<File>,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl LineSink {
    async fn write_record(&mut self, record: &Record) -> io::Result<()> {
        match &mut self.encoder {
            None => {
                self.out.write_all(record.body().as_bytes()).await?;
                self.out.write_all(b"\n").await
            }
            Some(encoder) => {
                encoder.write_all(record.body().as_bytes())?;
                encoder.write_all(b"\n")?;
                let compressed = std::mem::take(encoder.get_mut());
                if !compressed.is_empty() {
                    self.out.write_all(&compressed).await?;
                }
                Ok(())
            }
        }
    }

    async fn finish(mut self) -> io::Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let tail = encoder.finish()?;
            self.out.write_all(&tail).await?;
        }
        self.out.flush().await?;
        self.out.into_inner().sync_all().await
    }
}

#[async_trait]
impl RecordWriter for FileWriter {
    async fn write(
        &mut self,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, SinkError> {
        let file = self.create().await?;
        info!(destination = %self.path.display(), format = %self.format, "writing to file");

        let mut sink = LineSink {
            out: BufWriter::new(file),
            encoder: match self.format {
                FileFormat::Jsonl => None,
                FileFormat::Gzip => Some(GzEncoder::new(Vec::new(), Compression::default())),
            },
        };

        let mut written = 0;
        while let Some(record) = records.recv().await {
            sink.write_record(&record)
                .await
                .map_err(|error| SinkError::Write {
                    destination: self.destination(),
                    written,
                    error,
                })?;
            written += 1;
            notify_written(notifier, &record);
        }

        sink.finish().await.map_err(|error| SinkError::Write {
            destination: self.destination(),
            written,
            error,
        })?;

        info!(destination = %self.path.display(), written, "finished writing");
        Ok(written)
    }
}

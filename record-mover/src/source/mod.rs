use std::path::PathBuf;

use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    channel::{ReceiverClosed, RecordSender},
    error::SourceError,
    observe::{NotificationEvent, Notifier},
    record::{Record, RecordIdentity},
    route::FileFormat,
    validate::{validate, ValidationError},
};

pub mod gzip;
pub mod http;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub const DEFAULT_MONITOR_INTERVAL: u64 = 10_000;

/// Where records come from, as chosen by the source router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    File { path: PathBuf, format: FileFormat },
    Http { url: Url, format: FileFormat },
    Stdin { format: FileFormat },
}

impl SourceConfig {
    pub fn format(&self) -> FileFormat {
        match self {
            SourceConfig::File { format, .. }
            | SourceConfig::Http { format, .. }
            | SourceConfig::Stdin { format } => *format,
        }
    }

    /// Short name used in logs and as the prefix of record message ids.
    pub fn label(&self) -> String {
        match self {
            SourceConfig::File { path, .. } => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SourceConfig::Http { url, .. } => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .or(url.host_str())
                .unwrap_or("http")
                .to_string(),
            SourceConfig::Stdin { .. } => "stdin".to_string(),
        }
    }

    /// Open the underlying bytes and fill the first buffer.
    ///
    /// Everything that can go wrong before the first line (missing file, HTTP status,
    /// bad gzip header) surfaces here as `SourceError::Open`.
    pub async fn open(&self, client: &Client) -> Result<OpenedSource, SourceError> {
        let label = self.label();
        let raw: Box<dyn AsyncRead + Send + Unpin> = match self {
            SourceConfig::File { path, .. } => Box::new(
                tokio::fs::File::open(path)
                    .await
                    .map_err(|e| SourceError::open(&label, e))?,
            ),
            SourceConfig::Http { url, .. } => http::open(client, url, &label).await?,
            SourceConfig::Stdin { .. } => Box::new(tokio::io::stdin()),
        };

        let decoded: Box<dyn AsyncRead + Send + Unpin> = match self.format() {
            FileFormat::Jsonl => raw,
            FileFormat::Gzip => Box::new(gzip::decode(raw)),
        };

        let source = OpenedSource::new(label, decoded);
        source.prime().await
    }
}

/// A byte source that has been opened successfully and is ready to stream lines.
pub struct OpenedSource {
    label: String,
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
}

impl OpenedSource {
    pub fn new(label: impl Into<String>, reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            label: label.into(),
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn prime(mut self) -> Result<Self, SourceError> {
        let buffered = self
            .reader
            .fill_buf()
            .await
            .map_err(|e| SourceError::open(&self.label, e))?
            .len();
        debug!(source = %self.label, buffered, "source opened");
        Ok(self)
    }
}

/// Which lines to turn into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSettings {
    /// First line number (1-based) to consider. 0 and 1 both mean the first line.
    pub min_line: u64,
    /// Last line number to consider, inclusive. 0 means no limit.
    pub max_line: u64,
    /// Raise a monitor tick every this many lines. 0 disables ticks.
    pub monitor_interval: u64,
    pub validate: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            min_line: 0,
            max_line: 0,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            validate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    EndOfStream,
    MaxLineReached,
    /// The writer stopped receiving, usually because it failed.
    ReceiverClosed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Last line number consumed from the source.
    pub lines_read: u64,
    pub records_sent: u64,
    pub invalid: u64,
    pub stop: StopReason,
}

/// Streams lines from an opened source into the record channel.
pub struct RecordReader {
    source: OpenedSource,
    settings: ReaderSettings,
}

impl RecordReader {
    pub fn new(source: OpenedSource, settings: ReaderSettings) -> Self {
        Self { source, settings }
    }

    /// Read until the end of the source, the max line, or the writer going away.
    ///
    /// The channel is closed on every exit path, so the writer sees end-of-stream once
    /// whatever happens here.
    pub async fn read(
        mut self,
        mut records: RecordSender,
        notifier: Notifier,
    ) -> Result<ReadSummary, SourceError> {
        let result = self.stream(&records, &notifier).await;
        records.close();

        match &result {
            Ok(summary) => info!(
                source = %self.source.label,
                lines_read = summary.lines_read,
                records_sent = summary.records_sent,
                invalid = summary.invalid,
                stop = ?summary.stop,
                "finished reading"
            ),
            Err(e) => warn!(source = %self.source.label, error = %e, "reading failed"),
        }
        result
    }

    async fn stream(
        &mut self,
        records: &RecordSender,
        notifier: &Notifier,
    ) -> Result<ReadSummary, SourceError> {
        let settings = &self.settings;
        let label = self.source.label.as_str();
        let reader = &mut self.source.reader;

        let mut summary = ReadSummary::default();
        let mut buffer = Vec::with_capacity(4096);

        loop {
            buffer.clear();
            let read = reader.read_until(b'\n', &mut buffer).await.map_err(|error| {
                SourceError::Stream {
                    source_label: label.to_string(),
                    line_number: summary.lines_read,
                    error,
                }
            })?;
            if read == 0 {
                summary.stop = StopReason::EndOfStream;
                break;
            }

            summary.lines_read += 1;
            let line_number = summary.lines_read;

            if line_number >= settings.min_line {
                let text = String::from_utf8_lossy(&buffer);
                let line = text.trim();

                if !line.is_empty() {
                    match check(line, settings.validate) {
                        Ok(identity) => {
                            let event = NotificationEvent::RecordRead {
                                data_source: identity.data_source.clone(),
                                record_id: identity.record_id.clone(),
                            };
                            let record = Record::new(line, line_number, label, identity);
                            if let Err(ReceiverClosed(record)) = records.send(record).await {
                                warn!(
                                    source = label,
                                    line_number = record.sequence_number(),
                                    "writer stopped receiving, abandoning read"
                                );
                                summary.stop = StopReason::ReceiverClosed;
                                break;
                            }
                            notifier.notify(event);
                            summary.records_sent += 1;
                        }
                        Err(e) => {
                            debug!(source = label, line_number, error = %e, "invalid record");
                            let identity = RecordIdentity::lenient(line);
                            notifier.notify(NotificationEvent::RecordInvalid {
                                line_number,
                                data_source: identity.data_source,
                                record_id: identity.record_id,
                            });
                            summary.invalid += 1;
                        }
                    }
                }

                if settings.monitor_interval > 0 && line_number % settings.monitor_interval == 0 {
                    notifier.notify(NotificationEvent::MonitorTick { line_number });
                }
            }

            if settings.max_line > 0 && line_number >= settings.max_line {
                summary.stop = StopReason::MaxLineReached;
                break;
            }
        }

        Ok(summary)
    }
}

fn check(line: &str, enabled: bool) -> Result<RecordIdentity, ValidationError> {
    if enabled {
        validate(line)
    } else {
        Ok(RecordIdentity::default())
    }
}

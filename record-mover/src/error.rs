use std::io;

use thiserror::Error;

/// Errors raised while turning a locator into a source or sink configuration.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("locator {locator:?} is not a valid URL: {reason}")]
    InvalidLocator { locator: String, reason: String },
    #[error("unsupported scheme {scheme:?} in {locator:?}")]
    UnsupportedScheme { scheme: String, locator: String },
    #[error("cannot determine a file format for {locator:?}, expected a .jsonl or .gz suffix or an explicit JSONL/GZ override")]
    UnsupportedFormat { locator: String },
    #[error("unknown file type override {0:?}, expected JSONL or GZ")]
    UnknownFormatOverride(String),
}

/// Errors raised by a reader. An `Open` error always happens before any record is produced.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open source {source_label}: {reason}")]
    Open {
        source_label: String,
        reason: String,
        #[source]
        error: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("failed reading source {source_label} after line {line_number}")]
    Stream {
        source_label: String,
        line_number: u64,
        #[source]
        error: io::Error,
    },
}

impl SourceError {
    pub fn open(
        source_label: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SourceError::Open {
            source_label: source_label.into(),
            reason: error.to_string(),
            error: Some(Box::new(error)),
        }
    }
}

/// Errors surfaced by the message queue collaborators behind the queue sink.
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("failed to connect to {target}: {reason}")]
    Connection { target: String, reason: String },
    #[error("failed to deliver message {message_id}")]
    Delivery {
        message_id: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised by a writer.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("destination {0} already exists")]
    Conflict(String),
    #[error("failed to open destination {destination}")]
    Open {
        destination: String,
        #[source]
        error: io::Error,
    },
    #[error("failed writing to {destination} after {written} records")]
    Write {
        destination: String,
        written: u64,
        #[source]
        error: io::Error,
    },
    #[error("message queue producer for {target} failed")]
    Producer {
        target: String,
        #[source]
        error: ProducerError,
    },
    #[error("no managed producer is registered for scheme {0:?}")]
    ProducerUnavailable(String),
}

/// Settings that parse individually but cannot work together.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RECORD_MIN ({min}) is past RECORD_MAX ({max})")]
    RecordRange { min: u64, max: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// The single error a pipeline run reports to its caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build the HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("{0} task panicked or was aborted")]
    TaskFailed(&'static str),
}

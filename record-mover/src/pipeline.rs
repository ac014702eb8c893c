use std::{sync::Arc, time::Duration};

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    channel::{record_channel, DEFAULT_CHANNEL_CAPACITY},
    emit::{http::HttpEndpointProducer, ManagedProducer, ProducerRegistry, ProducerSettings},
    error::{ConfigError, PipelineError},
    monitor::RuntimeMonitor,
    observe::{Notifier, Observer, StatisticsAggregator, StatisticsSnapshot},
    route::{select_sink, select_source, FileFormat},
    source::{ReadSummary, ReaderSettings, RecordReader},
};

/// Everything a single move needs, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub input_url: Option<String>,
    pub input_format: Option<FileFormat>,
    pub output_url: Option<String>,
    pub output_format: Option<FileFormat>,
    pub reader: ReaderSettings,
    pub channel_capacity: usize,
    pub monitoring_period: Duration,
    pub producer: ProducerSettings,
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_url: None,
            input_format: None,
            output_url: None,
            output_format: None,
            reader: ReaderSettings::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            monitoring_period: Duration::from_secs(60),
            producer: ProducerSettings::default(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// What a successful move did.
#[derive(Debug, Clone)]
pub struct MoveReport {
    pub read: ReadSummary,
    pub records_written: u64,
    pub statistics: StatisticsSnapshot,
    /// Whether read and written totals agreed once every notification was processed.
    pub reconciled: bool,
}

/// Moves records from one source to one sink.
pub struct Pipeline {
    config: PipelineConfig,
    client: Client,
    producers: ProducerRegistry,
    observers: Vec<Arc<dyn Observer>>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline with the built-in `https` queue producer registered.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(PipelineError::Client)?;

        let mut producers = ProducerRegistry::new();
        producers.register("https", Arc::new(HttpEndpointProducer::new(client.clone())));

        Ok(Self {
            config,
            client,
            producers,
            observers: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Serve `scheme` sinks with `producer`, replacing any earlier registration.
    pub fn with_producer(
        mut self,
        scheme: impl Into<String>,
        producer: Arc<dyn ManagedProducer>,
    ) -> Self {
        self.producers.register(scheme, producer);
        self
    }

    /// Also deliver every notification to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Cancelling `cancel` stops the runtime monitor. Reads and writes run to completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self) -> Result<MoveReport, PipelineError> {
        if self.config.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel capacity").into());
        }

        let source = select_source(self.config.input_url.as_deref(), self.config.input_format)?;
        let sink = select_sink(
            self.config.output_url.as_deref(),
            self.config.output_format,
        )?;
        let mut writer = sink.construct(&self.producers, &self.config.producer)?;

        // Open before anything runs, a source that cannot be opened never starts the writer.
        let opened = source.open(&self.client).await?;
        info!(source = opened.label(), sink = ?sink, "starting move");

        let stats = Arc::new(StatisticsAggregator::new());
        let mut observers: Vec<Arc<dyn Observer>> = vec![stats.clone()];
        observers.extend(self.observers.iter().cloned());
        let notifier = Notifier::new(observers);

        let monitor_cancel = self.cancel.child_token();
        let monitor = RuntimeMonitor::new(
            &tokio::runtime::Handle::current(),
            self.config.monitoring_period,
            stats.clone(),
        )
        .spawn(monitor_cancel.clone());

        let (tx, mut rx) = record_channel(self.config.channel_capacity);
        let reader = RecordReader::new(opened, self.config.reader.clone());

        let read_task = tokio::spawn(reader.read(tx, notifier.clone()));
        let write_task = tokio::spawn({
            let notifier = notifier.clone();
            async move { writer.write(&mut rx, &notifier).await }
        });
        let (read_result, write_result) = tokio::join!(read_task, write_task);

        monitor_cancel.cancel();
        if monitor.await.is_err() {
            warn!("runtime monitor task failed");
        }
        notifier.drain().await;

        let read_result = read_result.map_err(|_| PipelineError::TaskFailed("reader"))?;
        let write_result = write_result.map_err(|_| PipelineError::TaskFailed("writer"))?;
        let read = read_result?;
        let records_written = write_result?;

        let reconciled = stats.reconcile();
        let report = MoveReport {
            read,
            records_written,
            statistics: stats.snapshot(),
            reconciled,
        };
        info!(
            lines_read = report.read.lines_read,
            records_read = report.statistics.total_read,
            records_written = report.records_written,
            invalid = report.statistics.invalid_lines.len(),
            reconciled = report.reconciled,
            "move complete"
        );
        Ok(report)
    }
}

use std::{str::FromStr, time::Duration};

use envconfig::Envconfig;

use crate::{
    emit::ProducerSettings,
    error::{ConfigError, PipelineError},
    pipeline::PipelineConfig,
    route::FileFormat,
    source::ReaderSettings,
};

#[derive(Envconfig, Clone)]
pub struct Config {
    // Unset reads standard input.
    pub input_url: Option<String>,

    // JSONL or GZ, overrides the input suffix.
    pub input_file_type: Option<String>,

    // Unset writes to standard output.
    pub output_url: Option<String>,

    pub output_file_type: Option<String>,

    #[envconfig(default = "0")]
    pub record_min: u64,

    #[envconfig(default = "0")]
    pub record_max: u64, // 0 reads to the end

    #[envconfig(default = "10000")]
    pub record_monitor: u64,

    #[envconfig(default = "true")]
    pub validate: bool,

    #[envconfig(default = "10")]
    pub channel_capacity: usize,

    #[envconfig(default = "60")]
    pub monitoring_period_seconds: u64,

    #[envconfig(default = "1")]
    pub producer_concurrency: usize,

    #[envconfig(default = "30000")]
    pub http_timeout_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub log_json: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

/// Producer settings for `kafka://` sinks, only used when built with the `kafka` feature.
#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Used when the sink URL names no broker.
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

impl Config {
    /// Check the settings against each other and build what the pipeline runs with.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        if self.record_max > 0 && self.record_min > self.record_max {
            return Err(ConfigError::RecordRange {
                min: self.record_min,
                max: self.record_max,
            }
            .into());
        }
        if self.record_monitor == 0 {
            return Err(ConfigError::Zero("RECORD_MONITOR").into());
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("CHANNEL_CAPACITY").into());
        }
        if self.monitoring_period_seconds == 0 {
            return Err(ConfigError::Zero("MONITORING_PERIOD_SECONDS").into());
        }
        if self.producer_concurrency == 0 {
            return Err(ConfigError::Zero("PRODUCER_CONCURRENCY").into());
        }

        Ok(PipelineConfig {
            input_url: non_empty(&self.input_url),
            input_format: parse_format(&self.input_file_type)?,
            output_url: non_empty(&self.output_url),
            output_format: parse_format(&self.output_file_type)?,
            reader: ReaderSettings {
                min_line: self.record_min,
                max_line: self.record_max,
                monitor_interval: self.record_monitor,
                validate: self.validate,
            },
            channel_capacity: self.channel_capacity,
            monitoring_period: Duration::from_secs(self.monitoring_period_seconds),
            producer: ProducerSettings {
                concurrency: self.producer_concurrency,
            },
            http_timeout: self.http_timeout_ms.0,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_format(value: &Option<String>) -> Result<Option<FileFormat>, PipelineError> {
    Ok(non_empty(value)
        .map(|v| v.parse::<FileFormat>())
        .transpose()?)
}

use std::{io::Write, path::Path, sync::Arc};

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use httpmock::prelude::*;
use parking_lot::Mutex;
use record_mover::{
    channel::RecordReceiver,
    emit::{ManagedProducer, ProducerSettings},
    error::{PipelineError, ProducerError, RouteError, SinkError, SourceError},
    observe::{Notification, NotificationEvent, Notifier, Observer},
    pipeline::{Pipeline, PipelineConfig},
    source::{ReaderSettings, StopReason},
};
use tempfile::TempDir;
use url::Url;

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<NotificationEvent>>,
}

impl EventLog {
    fn monitor_ticks(&self) -> Vec<u64> {
        let mut ticks: Vec<u64> = self
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                NotificationEvent::MonitorTick { line_number } => Some(*line_number),
                _ => None,
            })
            .collect();
        ticks.sort_unstable();
        ticks
    }

    fn invalid_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, NotificationEvent::RecordInvalid { .. }))
            .count()
    }
}

impl Observer for EventLog {
    fn update(&self, notification: &Notification) {
        self.events.lock().push(notification.event.clone());
    }
}

fn record(data_source: &str, id: u64) -> String {
    format!(r#"{{"DATA_SOURCE":"{data_source}","RECORD_ID":"{id}","NAME_FULL":"Person {id}"}}"#)
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn write_lines(dir: &TempDir, name: &str, lines: &[String]) -> String {
    let path = dir.path().join(name);
    let content: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(&path, content).unwrap();
    file_url(&path)
}

fn write_gzip(dir: &TempDir, name: &str, lines: &[String]) -> String {
    let path = dir.path().join(name);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    file_url(&path)
}

fn config(input: String, output: String) -> PipelineConfig {
    PipelineConfig {
        input_url: Some(input),
        output_url: Some(output),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_line_window_with_monitor_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=12).map(|n| record("CUSTOMERS", n)).collect();
    let input = write_lines(&dir, "customers.jsonl", &lines);
    let output_path = dir.path().join("out.jsonl");

    let log = Arc::new(EventLog::default());
    let report = Pipeline::new(PipelineConfig {
        reader: ReaderSettings {
            min_line: 2,
            max_line: 11,
            monitor_interval: 5,
            validate: true,
        },
        ..config(input, file_url(&output_path))
    })
    .unwrap()
    .with_observer(log.clone())
    .run()
    .await
    .unwrap();

    assert_eq!(report.read.stop, StopReason::MaxLineReached);
    assert_eq!(report.records_written, 10);
    assert_eq!(log.monitor_ticks(), vec![5, 10]);
    assert_eq!(log.invalid_count(), 0);
    assert!(report.reconciled);

    let written = std::fs::read_to_string(&output_path).unwrap();
    let expected: Vec<&str> = lines[1..11].iter().map(String::as_str).collect();
    assert_eq!(written.lines().collect::<Vec<_>>(), expected);
}

#[tokio::test]
async fn test_blank_and_broken_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut lines: Vec<String> = (1..=14).map(|n| record("CUSTOMERS", n)).collect();
    lines[3] = String::new();
    lines[4] = r#"{"DATA_SOURCE":"CUSTOMERS","RECORD_ID":"5""#.to_string();
    lines[7] = "   ".to_string();
    lines[9] = "{not json at all".to_string();
    let input = write_lines(&dir, "customers.jsonl", &lines);

    let report = Pipeline::new(PipelineConfig {
        reader: ReaderSettings {
            min_line: 2,
            max_line: 14,
            ..Default::default()
        },
        ..config(input, "null://".to_string())
    })
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(report.records_written, 9);
    assert_eq!(report.statistics.total_read, 9);
    assert_eq!(report.statistics.invalid_lines, vec![5, 10]);
    assert_eq!(report.statistics.data_sources.get("CUSTOMERS"), Some(&9));
    assert!(report.reconciled);
}

#[tokio::test]
async fn test_existing_destination_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_lines(&dir, "customers.jsonl", &[record("CUSTOMERS", 1)]);
    let output_path = dir.path().join("out.jsonl");
    std::fs::write(&output_path, "keep me\n").unwrap();

    let result = Pipeline::new(config(input, file_url(&output_path)))
        .unwrap()
        .run()
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Sink(SinkError::Conflict(_)))
    ));
    assert_eq!(std::fs::read_to_string(&output_path).unwrap(), "keep me\n");
}

#[tokio::test]
async fn test_http_not_found_never_starts_the_writer() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/exports/customers.jsonl");
        then.status(404);
    });
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("out.jsonl");

    let log = Arc::new(EventLog::default());
    let result = Pipeline::new(config(
        server.url("/exports/customers.jsonl"),
        file_url(&output_path),
    ))
    .unwrap()
    .with_observer(log.clone())
    .run()
    .await;

    assert!(matches!(
        result,
        Err(PipelineError::Source(SourceError::Open { .. }))
    ));
    assert!(log.events.lock().is_empty());
    assert!(!output_path.exists());
}

#[tokio::test]
async fn test_http_source_to_file() {
    let lines: Vec<String> = (1..=20).map(|n| record("WATCHLIST", n)).collect();
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/exports/watchlist.jsonl");
        then.status(200).body(body);
    });
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("out.jsonl");

    let report = Pipeline::new(config(
        server.url("/exports/watchlist.jsonl"),
        file_url(&output_path),
    ))
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(report.records_written, 20);
    assert_eq!(report.statistics.data_sources.get("WATCHLIST"), Some(&20));
    assert_eq!(
        std::fs::read_to_string(&output_path).unwrap().lines().count(),
        20
    );
}

#[tokio::test]
async fn test_gzip_source_matches_plain_source() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=500)
        .map(|n| record(if n % 3 == 0 { "WATCHLIST" } else { "CUSTOMERS" }, n))
        .collect();
    let plain = write_lines(&dir, "customers.jsonl", &lines);
    let gzipped = write_gzip(&dir, "customers.jsonl.gz", &lines);
    let plain_out = dir.path().join("plain-out.jsonl");
    let gzip_out = dir.path().join("gzip-out.jsonl");

    let plain_report = Pipeline::new(config(plain, file_url(&plain_out)))
        .unwrap()
        .run()
        .await
        .unwrap();
    let gzip_report = Pipeline::new(config(gzipped, file_url(&gzip_out)))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(plain_report.records_written, 500);
    assert_eq!(
        plain_report.statistics.data_sources,
        gzip_report.statistics.data_sources
    );
    assert_eq!(
        std::fs::read_to_string(&plain_out).unwrap(),
        std::fs::read_to_string(&gzip_out).unwrap()
    );
}

#[tokio::test]
async fn test_gzip_output_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=50).map(|n| record("CUSTOMERS", n)).collect();
    let input = write_lines(&dir, "customers.jsonl", &lines);
    let compressed = dir.path().join("out.jsonl.gz");
    let restored = dir.path().join("restored.jsonl");

    Pipeline::new(config(input, file_url(&compressed)))
        .unwrap()
        .run()
        .await
        .unwrap();
    let report = Pipeline::new(config(file_url(&compressed), file_url(&restored)))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.records_written, 50);
    let expected: String = lines.iter().map(|l| format!("{l}\n")).collect();
    assert_eq!(std::fs::read_to_string(&restored).unwrap(), expected);
}

#[tokio::test]
async fn test_validation_off_moves_every_non_blank_line() {
    let dir = tempfile::tempdir().unwrap();
    let lines = vec![
        record("CUSTOMERS", 1),
        "not json".to_string(),
        String::new(),
        r#"{"RECORD_ID":"3"}"#.to_string(),
    ];
    let input = write_lines(&dir, "mixed.jsonl", &lines);

    let report = Pipeline::new(PipelineConfig {
        reader: ReaderSettings {
            validate: false,
            ..Default::default()
        },
        ..config(input, "null://".to_string())
    })
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(report.records_written, 3);
    assert_eq!(report.statistics.total_read, 3);
    assert!(report.statistics.invalid_lines.is_empty());
    // Nothing is parsed, so every record lands in the unnamed bucket.
    assert_eq!(report.statistics.data_sources.get(""), Some(&3));
    assert!(report.reconciled);
}

#[tokio::test]
async fn test_https_queue_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=8).map(|n| record("CUSTOMERS", n)).collect();
    let input = write_lines(&dir, "customers.jsonl", &lines);

    let server = MockServer::start();
    let endpoint = server.mock(|when, then| {
        when.method(POST)
            .path("/queue/records")
            .header("content-type", "application/json")
            .header_exists("x-message-id");
        then.status(200);
    });

    // httpmock serves plain http, so register the built-in producer under that scheme.
    let target = server.url("/queue/records");
    let mut pipeline_config = config(input, target.replacen("http://", "https://", 1));
    pipeline_config.producer = ProducerSettings { concurrency: 4 };
    let report = Pipeline::new(pipeline_config)
        .unwrap()
        .with_producer("https", Arc::new(Redirect { to: target }))
        .run()
        .await
        .unwrap();

    assert_eq!(report.records_written, 8);
    assert!(report.reconciled);
    endpoint.assert_hits(8);
}

// Forwards to the built-in HTTP producer against a plain-http mock server.
struct Redirect {
    to: String,
}

#[async_trait]
impl ManagedProducer for Redirect {
    async fn produce(
        &self,
        _target: &Url,
        settings: &ProducerSettings,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, ProducerError> {
        let target = Url::parse(&self.to).unwrap();
        record_mover::emit::http::HttpEndpointProducer::new(reqwest::Client::new())
            .produce(&target, settings, records, notifier)
            .await
    }
}

#[tokio::test]
async fn test_unregistered_queue_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_lines(&dir, "customers.jsonl", &[record("CUSTOMERS", 1)]);

    let result = Pipeline::new(config(input, "sqs://us-east-1/records".to_string()))
        .unwrap()
        .run()
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Sink(SinkError::ProducerUnavailable(scheme))) if scheme == "sqs"
    ));
}

#[tokio::test]
async fn test_failing_producer_surfaces_writer_error() {
    struct Broken;

    #[async_trait]
    impl ManagedProducer for Broken {
        async fn produce(
            &self,
            target: &Url,
            _settings: &ProducerSettings,
            records: &mut RecordReceiver,
            _notifier: &Notifier,
        ) -> Result<u64, ProducerError> {
            records.recv().await;
            Err(ProducerError::Connection {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=100).map(|n| record("CUSTOMERS", n)).collect();
    let input = write_lines(&dir, "customers.jsonl", &lines);

    let result = Pipeline::new(config(input, "amqp://localhost:5672/%2f".to_string()))
        .unwrap()
        .with_producer("amqp", Arc::new(Broken))
        .run()
        .await;

    // The reader stops quietly when the writer goes away, so the writer's error is reported.
    assert!(matches!(
        result,
        Err(PipelineError::Sink(SinkError::Producer { .. }))
    ));
}

// A gzip file whose trailer checksum is wrong: every record decodes, then the read fails.
fn write_gzip_with_bad_checksum(dir: &TempDir, name: &str, lines: &[String]) -> String {
    let url = write_gzip(dir, name, lines);
    let path = dir.path().join(name);
    let mut bytes = std::fs::read(&path).unwrap();
    let crc_start = bytes.len() - 8;
    for byte in &mut bytes[crc_start..crc_start + 4] {
        *byte ^= 0xff;
    }
    std::fs::write(&path, bytes).unwrap();
    url
}

#[tokio::test]
async fn test_mid_stream_source_error_after_writer_drains() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=30).map(|n| record("CUSTOMERS", n)).collect();
    let input = write_gzip_with_bad_checksum(&dir, "customers.jsonl.gz", &lines);
    let output_path = dir.path().join("out.jsonl");

    let result = Pipeline::new(config(input, file_url(&output_path)))
        .unwrap()
        .run()
        .await;

    match result {
        Err(PipelineError::Source(SourceError::Stream { line_number, .. })) => {
            assert_eq!(line_number, 30)
        }
        other => panic!("expected a stream error, got {other:?}"),
    }
    // Everything read before the failure still reached the sink.
    let written = std::fs::read_to_string(&output_path).unwrap();
    assert_eq!(written.lines().count(), 30);
}

#[tokio::test]
async fn test_reader_error_wins_when_both_sides_fail() {
    // Takes every record, then fails once the channel is closed.
    struct FailsOnFlush;

    #[async_trait]
    impl ManagedProducer for FailsOnFlush {
        async fn produce(
            &self,
            target: &Url,
            _settings: &ProducerSettings,
            records: &mut RecordReceiver,
            _notifier: &Notifier,
        ) -> Result<u64, ProducerError> {
            while records.recv().await.is_some() {}
            Err(ProducerError::Connection {
                target: target.to_string(),
                reason: "flush failed".to_string(),
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (1..=30).map(|n| record("CUSTOMERS", n)).collect();
    let input = write_gzip_with_bad_checksum(&dir, "customers.jsonl.gz", &lines);

    let result = Pipeline::new(config(input, "amqp://localhost:5672/%2f".to_string()))
        .unwrap()
        .with_producer("amqp", Arc::new(FailsOnFlush))
        .run()
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Source(SourceError::Stream { .. }))
    ));
}

#[tokio::test]
async fn test_routing_errors() {
    let result = Pipeline::new(config(
        "ftp://example.com/customers.jsonl".to_string(),
        "null://".to_string(),
    ))
    .unwrap()
    .run()
    .await;
    assert!(matches!(
        result,
        Err(PipelineError::Route(RouteError::UnsupportedScheme { .. }))
    ));

    let result = Pipeline::new(config(
        "file:///data/customers.csv".to_string(),
        "null://".to_string(),
    ))
    .unwrap()
    .run()
    .await;
    assert!(matches!(
        result,
        Err(PipelineError::Route(RouteError::UnsupportedFormat { .. }))
    ));
}

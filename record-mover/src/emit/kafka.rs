use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use rdkafka::{
    error::KafkaError,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
    ClientConfig,
};
use tracing::{debug, info};
use url::Url;

use super::{notify_written, ManagedProducer, ProducerSettings};
use crate::{
    channel::RecordReceiver, config::KafkaConfig, error::ProducerError, observe::Notifier,
    record::Record,
};

/// Produces records to `kafka://host:port/topic`, keyed by message id.
///
/// Brokers named in the target take precedence over `KAFKA_HOSTS`.
pub struct KafkaProducer {
    config: KafkaConfig,
}

impl KafkaProducer {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    fn client(&self, brokers: &str) -> Result<FutureProducer, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", brokers)
            .set("linger.ms", self.config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                self.config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                self.config.kafka_compression_codec.to_owned(),
            )
            .set(
                "queue.buffering.max.kbytes",
                (self.config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if self.config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        client_config.create()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.kafka_message_timeout_ms.into())
    }
}

fn brokers_and_topic(target: &Url, default_brokers: &str) -> Option<(String, String)> {
    let topic = target.path().trim_matches('/');
    if topic.is_empty() {
        return None;
    }
    let brokers = match (target.host_str(), target.port()) {
        (Some(host), Some(port)) if !host.is_empty() => format!("{host}:{port}"),
        (Some(host), None) if !host.is_empty() => format!("{host}:9092"),
        _ => default_brokers.to_string(),
    };
    Some((brokers, topic.to_string()))
}

async fn send(
    producer: &FutureProducer,
    topic: &str,
    timeout: Duration,
    record: Record,
    notifier: &Notifier,
) -> Result<(), ProducerError> {
    let message_id = record.message_id();
    let delivery = producer
        .send(
            FutureRecord::to(topic)
                .key(message_id.as_str())
                .payload(record.body()),
            Timeout::After(timeout),
        )
        .await;

    match delivery {
        Ok(_) => {
            notify_written(notifier, &record);
            Ok(())
        }
        Err((error, _)) => Err(ProducerError::Delivery {
            message_id,
            error: Box::new(error),
        }),
    }
}

#[async_trait]
impl ManagedProducer for KafkaProducer {
    async fn produce(
        &self,
        target: &Url,
        settings: &ProducerSettings,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, ProducerError> {
        let (brokers, topic) = brokers_and_topic(target, &self.config.kafka_hosts).ok_or_else(
            || ProducerError::Connection {
                target: target.to_string(),
                reason: "missing topic".to_string(),
            },
        )?;
        let producer = self
            .client(&brokers)
            .map_err(|e| ProducerError::Connection {
                target: brokers.clone(),
                reason: e.to_string(),
            })?;
        info!(brokers, topic, "producing to kafka");

        let timeout = self.timeout();
        let concurrency = settings.concurrency.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut receiving = true;
        let mut delivered = 0;

        loop {
            tokio::select! {
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    result?;
                    delivered += 1;
                }
                record = records.recv(), if receiving && in_flight.len() < concurrency => {
                    match record {
                        Some(record) => {
                            in_flight.push(send(&producer, &topic, timeout, record, notifier))
                        }
                        None => receiving = false,
                    }
                }
                else => break,
            }
        }
        Ok(delivered)
    }
}

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use reqwest::{header::CONTENT_TYPE, Client};
use tracing::debug;
use url::Url;

use super::{notify_written, ManagedProducer, ProducerSettings};
use crate::{
    channel::RecordReceiver, error::ProducerError, observe::Notifier, record::Record,
};

pub const MESSAGE_ID_HEADER: &str = "X-Message-Id";

/// Posts each record to an HTTPS queue endpoint, one request per record.
pub struct HttpEndpointProducer {
    client: Client,
}

impl HttpEndpointProducer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn deliver(
        &self,
        target: &Url,
        record: Record,
        notifier: &Notifier,
    ) -> Result<(), ProducerError> {
        let message_id = record.message_id();
        let response = self
            .client
            .post(target.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(MESSAGE_ID_HEADER, &message_id)
            .body(record.body().to_string())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|error| ProducerError::Delivery {
                message_id: message_id.clone(),
                error: Box::new(error),
            })?;

        debug!(message_id, status = %response.status(), "delivered");
        notify_written(notifier, &record);
        Ok(())
    }
}

#[async_trait]
impl ManagedProducer for HttpEndpointProducer {
    async fn produce(
        &self,
        target: &Url,
        settings: &ProducerSettings,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, ProducerError> {
        let concurrency = settings.concurrency.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut receiving = true;
        let mut delivered = 0;

        loop {
            tokio::select! {
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    // Returning early drops whatever is still in flight.
                    result?;
                    delivered += 1;
                }
                record = records.recv(), if receiving && in_flight.len() < concurrency => {
                    match record {
                        Some(record) => in_flight.push(self.deliver(target, record, notifier)),
                        None => receiving = false,
                    }
                }
                else => break,
            }
        }
        Ok(delivered)
    }
}

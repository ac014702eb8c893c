use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{error, info};
use url::Url;

use super::RecordWriter;
use crate::{
    channel::RecordReceiver,
    error::{ProducerError, SinkError},
    observe::Notifier,
};

pub const DEFAULT_PRODUCER_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Deliveries allowed in flight at once.
    pub concurrency: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_PRODUCER_CONCURRENCY,
        }
    }
}

/// Delivers records to a message queue.
///
/// A producer owns the channel until it is closed and drained, raises `RecordWritten` for
/// every record the queue accepted, and returns how many that was. Returning an error
/// stops the run.
#[async_trait]
pub trait ManagedProducer: Send + Sync {
    async fn produce(
        &self,
        target: &Url,
        settings: &ProducerSettings,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, ProducerError>;
}

/// Producers keyed by the URL scheme they serve.
#[derive(Clone, Default)]
pub struct ProducerRegistry {
    producers: HashMap<String, Arc<dyn ManagedProducer>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scheme: impl Into<String>, producer: Arc<dyn ManagedProducer>) {
        let scheme = scheme.into().to_ascii_lowercase();
        info!(scheme = %scheme, "registered managed producer");
        self.producers.insert(scheme, producer);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn ManagedProducer>> {
        self.producers.get(&scheme.to_ascii_lowercase()).cloned()
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.producers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

/// Hands the record channel to the producer registered for the target's scheme.
pub struct QueueWriter {
    target: Url,
    producer: Arc<dyn ManagedProducer>,
    settings: ProducerSettings,
}

impl QueueWriter {
    pub fn new(target: Url, producer: Arc<dyn ManagedProducer>, settings: ProducerSettings) -> Self {
        Self {
            target,
            producer,
            settings,
        }
    }

    // Queue URLs routinely carry credentials, keep them out of logs and errors.
    fn display_target(&self) -> String {
        let mut shown = self.target.clone();
        if shown.password().is_some() && shown.set_password(Some("***")).is_err() {
            return format!("{}://", shown.scheme());
        }
        shown.to_string()
    }
}

#[async_trait]
impl RecordWriter for QueueWriter {
    async fn write(
        &mut self,
        records: &mut RecordReceiver,
        notifier: &Notifier,
    ) -> Result<u64, SinkError> {
        let target = self.display_target();
        info!(
            target = %target,
            concurrency = self.settings.concurrency,
            "producing to queue"
        );

        match self
            .producer
            .produce(&self.target, &self.settings, records, notifier)
            .await
        {
            Ok(written) => {
                info!(target = %target, written, "finished producing");
                Ok(written)
            }
            Err(error) => {
                error!(target = %target, error = %error, "producer failed");
                Err(SinkError::Producer { target, error })
            }
        }
    }
}

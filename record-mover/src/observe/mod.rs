use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio_util::task::TaskTracker;
use tracing::debug;

pub mod stats;

pub use stats::{StatisticsAggregator, StatisticsSnapshot};

/// What happened to a record, as reported by readers and writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    RecordRead {
        data_source: String,
        record_id: String,
    },
    RecordWritten {
        data_source: String,
        record_id: String,
    },
    RecordInvalid {
        line_number: u64,
        data_source: String,
        record_id: String,
    },
    MonitorTick {
        line_number: u64,
    },
}

/// An event stamped with the time it was raised, as an RFC 3339 string.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: NotificationEvent,
    pub timestamp: String,
}

impl Notification {
    pub fn now(event: NotificationEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

/// Receives notifications. Implementations are called from many tasks at once.
pub trait Observer: Send + Sync {
    fn update(&self, notification: &Notification);
}

/// Fans notifications out to observers on short-lived background tasks.
///
/// Every dispatch is tracked; `drain` waits until all of them have finished, which is
/// the point after which observer state is safe to read.
#[derive(Clone)]
pub struct Notifier {
    observers: Arc<Vec<Arc<dyn Observer>>>,
    tracker: TaskTracker,
}

impl Notifier {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self {
            observers: Arc::new(observers),
            tracker: TaskTracker::new(),
        }
    }

    /// Fire and forget. Never blocks the caller.
    pub fn notify(&self, event: NotificationEvent) {
        if self.observers.is_empty() {
            return;
        }
        let observers = self.observers.clone();
        let notification = Notification::now(event);
        self.tracker.spawn(async move {
            for observer in observers.iter() {
                observer.update(&notification);
            }
        });
    }

    /// Notification tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every notification dispatched so far to be processed.
    pub async fn drain(&self) {
        debug!(in_flight = self.tracker.len(), "draining notifications");
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

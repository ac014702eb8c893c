use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{Notification, NotificationEvent, Observer};

/// Running totals for one pipeline run.
///
/// Each event kind has its own lock, so notifications of different kinds never
/// contend with each other. Reads are only meaningful once the notifier has drained.
#[derive(Default)]
pub struct StatisticsAggregator {
    total_read: Mutex<i64>,
    data_sources: Mutex<HashMap<String, i64>>,
    last_update: Mutex<Option<DateTime<Utc>>>,
    invalid_lines: Mutex<Vec<i64>>,
}

/// A point-in-time copy of the aggregator, taken after the run drained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsSnapshot {
    pub total_read: i64,
    pub data_sources: HashMap<String, i64>,
    pub invalid_lines: Vec<i64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl StatisticsSnapshot {
    pub fn total_written(&self) -> i64 {
        self.data_sources.values().sum()
    }

    /// Whether everything read was also accounted for as written.
    pub fn is_reconciled(&self) -> bool {
        self.total_read == self.total_written()
    }
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_read(&self) {
        *self.total_read.lock() += 1;
        metrics::counter!("record_mover_records_read_total").increment(1);
    }

    fn record_written(&self, data_source: &str, timestamp: &str) {
        {
            let mut data_sources = self.data_sources.lock();
            match data_sources.get_mut(data_source) {
                Some(count) => *count += 1,
                None => {
                    data_sources.insert(data_source.to_string(), 1);
                }
            }
        }

        // Unparsable timestamps still count, they just can't move the clock.
        if let Ok(at) = DateTime::parse_from_rfc3339(timestamp) {
            let at = at.with_timezone(&Utc);
            let mut last_update = self.last_update.lock();
            if last_update.map_or(true, |current| at > current) {
                *last_update = Some(at);
            }
        }

        metrics::counter!("record_mover_records_written_total").increment(1);
    }

    fn record_invalid(&self, line_number: u64) {
        self.invalid_lines.lock().push(line_number as i64);
        metrics::counter!("record_mover_records_invalid_total").increment(1);
    }

    /// Per data source written counts.
    pub fn data_source_codes(&self) -> HashMap<String, i64> {
        self.data_sources.lock().clone()
    }

    /// Line numbers that failed validation, in ascending order.
    ///
    /// Notifications are processed concurrently, so detection order is restored here.
    pub fn invalid_record_definitions(&self) -> Vec<i64> {
        let mut lines = self.invalid_lines.lock().clone();
        lines.sort_unstable();
        lines
    }

    pub fn total_read(&self) -> i64 {
        *self.total_read.lock()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total_read: self.total_read(),
            data_sources: self.data_source_codes(),
            invalid_lines: self.invalid_record_definitions(),
            last_update: self.last_update_time(),
        }
    }

    /// Compare reads against writes and log the outcome. A mismatch points at lost
    /// notifications rather than lost records, so it is never an error.
    pub fn reconcile(&self) -> bool {
        let snapshot = self.snapshot();
        let written = snapshot.total_written();
        if snapshot.is_reconciled() {
            info!(
                read = snapshot.total_read,
                written,
                invalid = snapshot.invalid_lines.len(),
                "record counts reconciled"
            );
            true
        } else {
            warn!(
                read = snapshot.total_read,
                written,
                data_sources = ?snapshot.data_sources,
                "read and written record counts differ"
            );
            false
        }
    }
}

impl Observer for StatisticsAggregator {
    fn update(&self, notification: &Notification) {
        match &notification.event {
            NotificationEvent::RecordRead { .. } => self.record_read(),
            NotificationEvent::RecordWritten { data_source, .. } => {
                self.record_written(data_source, &notification.timestamp)
            }
            NotificationEvent::RecordInvalid { line_number, .. } => {
                self.record_invalid(*line_number)
            }
            NotificationEvent::MonitorTick { line_number } => {
                info!(line_number, read = self.total_read(), "reading");
            }
        }
    }
}

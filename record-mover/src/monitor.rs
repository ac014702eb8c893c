use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{runtime::RuntimeMetrics, task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::observe::StatisticsAggregator;

pub const RUNTIME_NUM_WORKERS: &str = "record_mover_runtime_num_workers";
pub const RUNTIME_ALIVE_TASKS: &str = "record_mover_runtime_alive_tasks";
pub const RUNTIME_GLOBAL_QUEUE_DEPTH: &str = "record_mover_runtime_global_queue_depth";
pub const RECORDS_PER_SECOND: &str = "record_mover_records_per_second";

/// Periodically samples the runtime and the run's totals until cancelled.
pub struct RuntimeMonitor {
    metrics: RuntimeMetrics,
    period: Duration,
    stats: Arc<StatisticsAggregator>,
}

impl RuntimeMonitor {
    pub fn new(
        handle: &tokio::runtime::Handle,
        period: Duration,
        stats: Arc<StatisticsAggregator>,
    ) -> Self {
        Self {
            metrics: handle.metrics(),
            period,
            stats,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        if self.period.is_zero() {
            return;
        }

        let num_workers = self.metrics.num_workers();
        info!(
            workers = num_workers,
            period_secs = self.period.as_secs_f64(),
            "starting runtime monitor"
        );
        metrics::gauge!(RUNTIME_NUM_WORKERS).set(num_workers as f64);

        let started = Instant::now();
        let mut ticker = interval(self.period);
        // The first tick completes immediately, nothing to report yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample(started.elapsed()),
            }
        }
        info!("runtime monitor stopped");
    }

    fn sample(&self, elapsed: Duration) {
        let alive_tasks = self.metrics.num_alive_tasks();
        let global_queue_depth = self.metrics.global_queue_depth();
        let read = self.stats.total_read();
        let written: i64 = self.stats.data_source_codes().values().sum();
        let rate = read as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

        metrics::gauge!(RUNTIME_ALIVE_TASKS).set(alive_tasks as f64);
        metrics::gauge!(RUNTIME_GLOBAL_QUEUE_DEPTH).set(global_queue_depth as f64);
        metrics::gauge!(RECORDS_PER_SECOND).set(rate);

        info!(
            alive_tasks,
            global_queue_depth,
            read,
            written,
            records_per_second = rate,
            elapsed_secs = elapsed.as_secs(),
            "pipeline progress"
        );
    }
}

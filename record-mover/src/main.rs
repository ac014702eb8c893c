use anyhow::Error;
use envconfig::Envconfig;
use record_mover::{config::Config, pipeline::Pipeline};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Standard output may be the sink, so logs always go to stderr.
fn setup_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, letting the current move finish");
                cancel.cancel();
            }
            Err(e) => error!("failed to listen for ctrl+c: {e}"),
        }
    });
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    let config = Config::init_from_env()?;
    setup_tracing(config.log_json);
    info!("Starting up...");

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let pipeline = Pipeline::new(config.pipeline_config()?)?.with_cancellation(cancel);

    #[cfg(feature = "kafka")]
    let pipeline = pipeline.with_producer(
        "kafka",
        std::sync::Arc::new(record_mover::emit::kafka::KafkaProducer::new(
            config.kafka.clone(),
        )),
    );

    let report = pipeline.run().await.inspect_err(|e| error!("move failed: {e:#}"))?;

    info!(
        records_read = report.statistics.total_read,
        records_written = report.records_written,
        invalid_lines = ?report.statistics.invalid_lines,
        data_sources = ?report.statistics.data_sources,
        last_update = ?report.statistics.last_update,
        reconciled = report.reconciled,
        "Done"
    );
    Ok(())
}

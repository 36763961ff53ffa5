use anyhow::Context;
use recording_recommendations::{
    config::SinkKind, publish_all, ClickHouseDatasetStore, Config, FileModelRepository,
    JsonLinesSink, MessageSink, RecommendationPipeline,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout may carry the message stream
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("Failed to load config")?;
    config.validate()?;

    let users = config.requested_users()?;
    let limits = config.limits();

    info!(
        top_artist_limit = limits.top_artist,
        similar_artist_limit = limits.similar_artist,
        raw_limit = limits.raw,
        requested_users = users.len(),
        "Starting recording recommendations"
    );

    let store = Arc::new(ClickHouseDatasetStore::from_config(&config));
    let models = Arc::new(FileModelRepository::new(&config.model_dir));
    let pipeline = RecommendationPipeline::new(store, models, &config.model_report_base_url);

    let messages = pipeline.run(limits, &users).await.map_err(|e| {
        error!(error = %e, "Recommendation run failed");
        e
    })?;
    let summary = *messages.summary();

    let sink = build_sink(&config)?;
    publish_all(sink.as_ref(), messages).await?;

    info!(
        active_users = summary.active_user_count,
        top_artist_users = summary.top_artist_user_count,
        similar_artist_users = summary.similar_artist_user_count,
        raw_users = summary.raw_user_count,
        total_hours = summary.total_elapsed_hours,
        "Recording recommendations completed"
    );

    Ok(())
}

fn build_sink(config: &Config) -> anyhow::Result<Box<dyn MessageSink>> {
    match config.sink {
        SinkKind::Stdout => Ok(Box::new(JsonLinesSink::stdout())),
        #[cfg(feature = "kafka")]
        SinkKind::Kafka => Ok(Box::new(
            recording_recommendations::sink::KafkaMessageSink::new(
                &config.kafka_brokers,
                config.kafka_topic.clone(),
            )?,
        )),
        #[cfg(not(feature = "kafka"))]
        SinkKind::Kafka => anyhow::bail!("kafka sink requires the `kafka` feature"),
    }
}

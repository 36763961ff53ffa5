use crate::error::{RecommendationError, Result};
use crate::models::{ExternalUserId, RecommendationSource};
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // ClickHouse (dataset store)
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub clickhouse_user: String,
    pub clickhouse_password: String,

    // Tables
    pub candidate_top_artist_table: String,
    pub candidate_similar_artist_table: String,
    pub item_metadata_table: String,
    pub listen_history_table: String,
    pub model_metadata_table: String,

    // Model
    pub model_dir: String,
    pub model_report_base_url: String,

    // Per-source recommendation limits
    pub top_artist_limit: usize,
    pub similar_artist_limit: usize,
    pub raw_limit: usize,

    /// Comma-separated external user ids; empty means every active user.
    pub users: String,

    // Output
    pub sink: SinkKind,
    pub kafka_brokers: String,
    pub kafka_topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Stdout,
    Kafka,
}

/// Number of recommendations kept per user for each source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLimits {
    pub top_artist: usize,
    pub similar_artist: usize,
    pub raw: usize,
}

impl SourceLimits {
    pub fn for_source(&self, source: RecommendationSource) -> usize {
        match source {
            RecommendationSource::TopArtist => self.top_artist,
            RecommendationSource::SimilarArtist => self.similar_artist,
            RecommendationSource::Raw => self.raw,
        }
    }
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            top_artist: 1000,
            similar_artist: 1000,
            raw: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .set_default("clickhouse_url", "http://localhost:8123")?
            .set_default("clickhouse_database", "recommendations")?
            .set_default("clickhouse_user", "default")?
            .set_default("clickhouse_password", "")?
            .set_default("candidate_top_artist_table", "recording_top_artist_candidate_set")?
            .set_default(
                "candidate_similar_artist_table",
                "recording_similar_artist_candidate_set",
            )?
            .set_default("item_metadata_table", "recording")?
            .set_default("listen_history_table", "recording_discovery")?
            .set_default("model_metadata_table", "recording_model_metadata")?
            .set_default("model_dir", "/data/recommendation/recording/models")?
            .set_default("model_report_base_url", "http://michael.metabrainz.org")?
            .set_default("top_artist_limit", 1000)?
            .set_default("similar_artist_limit", 1000)?
            .set_default("raw_limit", 1000)?
            .set_default("users", "")?
            .set_default("sink", "stdout")?
            .set_default("kafka_brokers", "localhost:9092")?
            .set_default("kafka_topic", "recording-recommendations")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.clickhouse_url.is_empty() {
            return Err(RecommendationError::Configuration(
                "ClickHouse URL is required".to_string(),
            ));
        }

        if self.model_dir.is_empty() {
            return Err(RecommendationError::Configuration(
                "Model directory is required".to_string(),
            ));
        }

        let limits = self.limits();
        for source in RecommendationSource::ALL {
            if limits.for_source(source) == 0 {
                return Err(RecommendationError::Configuration(format!(
                    "{} limit must be greater than 0",
                    source.as_str()
                )));
            }
        }

        if self.sink == SinkKind::Kafka && self.kafka_brokers.is_empty() {
            return Err(RecommendationError::Configuration(
                "Kafka brokers are required for the kafka sink".to_string(),
            ));
        }

        self.requested_users()?;
        Ok(())
    }

    pub fn limits(&self) -> SourceLimits {
        SourceLimits {
            top_artist: self.top_artist_limit,
            similar_artist: self.similar_artist_limit,
            raw: self.raw_limit,
        }
    }

    pub fn requested_users(&self) -> Result<BTreeSet<ExternalUserId>> {
        parse_user_list(&self.users)
    }
}

fn parse_user_list(raw: &str) -> Result<BTreeSet<ExternalUserId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ExternalUserId>().map_err(|e| {
                RecommendationError::Configuration(format!("invalid user id '{}': {}", s, e))
            })
        })
        .collect()
}

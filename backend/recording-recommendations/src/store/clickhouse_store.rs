// ============================================
// ClickHouse Dataset Store
// ============================================
//
// Reads the recommendation input tables from ClickHouse. Each read is a
// full-table SELECT; joins and filtering happen in the pipeline.

use super::{CandidateTable, DatasetStore};
use crate::config::Config;
use crate::error::{RecommendationError, Result};
use crate::models::{CandidateRow, ItemMetadataRow, ListenHistoryRow, ModelMetadata};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TableNames {
    pub top_artist_candidates: String,
    pub similar_artist_candidates: String,
    pub item_metadata: String,
    pub listen_history: String,
    pub model_metadata: String,
}

pub struct ClickHouseDatasetStore {
    client: Client,
    database: String,
    tables: TableNames,
}

impl ClickHouseDatasetStore {
    pub fn new(
        url: &str,
        database: &str,
        username: &str,
        password: &str,
        tables: TableNames,
    ) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_database(database)
            .with_user(username)
            .with_password(password);

        info!(
            url = url,
            database = database,
            "ClickHouseDatasetStore initialized"
        );

        Self {
            client,
            database: database.to_string(),
            tables,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.clickhouse_url,
            &config.clickhouse_database,
            &config.clickhouse_user,
            &config.clickhouse_password,
            TableNames {
                top_artist_candidates: config.candidate_top_artist_table.clone(),
                similar_artist_candidates: config.candidate_similar_artist_table.clone(),
                item_metadata: config.item_metadata_table.clone(),
                listen_history: config.listen_history_table.clone(),
                model_metadata: config.model_metadata_table.clone(),
            },
        )
    }

    async fn fetch_table<T>(&self, table: &str, columns: &str) -> Result<Vec<T>>
    where
        T: Row + for<'b> Deserialize<'b>,
    {
        let query = format!("SELECT {} FROM {}.{}", columns, self.database, table);

        debug!(table = table, "Reading table from ClickHouse");

        let rows: Vec<T> = self
            .client
            .query(&query)
            .fetch_all()
            .await
            .map_err(|e| {
                error!(table = table, error = %e, "Failed to read table");
                RecommendationError::dataset_unavailable(table, e)
            })?;

        debug!(table = table, count = rows.len(), "Read table");
        Ok(rows)
    }
}

// ============================================
// ClickHouse Row Types
// ============================================

#[derive(Debug, Row, Deserialize)]
struct CandidateRecord {
    spark_user_id: i64,
    recording_id: i64,
    user_id: i64,
}

#[derive(Debug, Row, Deserialize)]
struct RecordingRecord {
    recording_id: i64,
    recording_mbid: String,
}

#[derive(Debug, Row, Deserialize)]
struct DiscoveryRecord {
    user_id: i64,
    recording_mbid: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    latest_listened_at: time::OffsetDateTime,
}

#[derive(Debug, Row, Deserialize)]
struct ModelRecord {
    model_id: String,
    model_html_file: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    model_created: time::OffsetDateTime,
}

#[async_trait]
impl DatasetStore for ClickHouseDatasetStore {
    async fn candidate_set(&self, table: CandidateTable) -> Result<Vec<CandidateRow>> {
        let name = match table {
            CandidateTable::TopArtist => &self.tables.top_artist_candidates,
            CandidateTable::SimilarArtist => &self.tables.similar_artist_candidates,
        };

        let rows: Vec<CandidateRecord> = self
            .fetch_table(name, "spark_user_id, recording_id, user_id")
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| CandidateRow {
                internal_user_id: row.spark_user_id,
                item_id: row.recording_id,
                external_user_id: row.user_id,
            })
            .collect())
    }

    async fn item_metadata(&self) -> Result<Vec<ItemMetadataRow>> {
        let rows: Vec<RecordingRecord> = self
            .fetch_table(&self.tables.item_metadata, "recording_id, recording_mbid")
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ItemMetadataRow {
                item_id: row.recording_id,
                item_mbid: row.recording_mbid,
            })
            .collect())
    }

    async fn listen_history(&self) -> Result<Vec<ListenHistoryRow>> {
        let rows: Vec<DiscoveryRecord> = self
            .fetch_table(
                &self.tables.listen_history,
                "user_id, recording_mbid, latest_listened_at",
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let Some(last_listened_at) = offset_datetime_to_chrono(row.latest_listened_at)
                else {
                    warn!(
                        user_id = row.user_id,
                        recording_mbid = %row.recording_mbid,
                        "Skipping listen with out-of-range timestamp"
                    );
                    return None;
                };

                Some(ListenHistoryRow {
                    external_user_id: row.user_id,
                    item_mbid: row.recording_mbid,
                    last_listened_at,
                })
            })
            .collect())
    }

    async fn model_metadata(&self) -> Result<Vec<ModelMetadata>> {
        let table = &self.tables.model_metadata;
        let rows: Vec<ModelRecord> = self
            .fetch_table(table, "model_id, model_html_file, model_created")
            .await?;

        rows.into_iter()
            .map(|row| {
                let created_at = offset_datetime_to_chrono(row.model_created).ok_or_else(|| {
                    RecommendationError::dataset_unavailable(
                        table.as_str(),
                        format!("invalid creation time for model {}", row.model_id),
                    )
                })?;

                Ok(ModelMetadata {
                    model_id: row.model_id,
                    model_report_file: row.model_html_file,
                    created_at,
                })
            })
            .collect()
    }
}

fn offset_datetime_to_chrono(dt: time::OffsetDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond())
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_datetime_conversion_keeps_millis() {
        let dt = time::OffsetDateTime::from_unix_timestamp(1_600_000_000).unwrap()
            + time::Duration::milliseconds(123);

        let converted = offset_datetime_to_chrono(dt).unwrap();
        assert_eq!(converted.timestamp(), 1_600_000_000);
        assert_eq!(converted.timestamp_subsec_millis(), 123);
    }
}

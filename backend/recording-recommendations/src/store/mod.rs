// ============================================
// Dataset Store
// ============================================
//
// Read-only access to the tables a recommendation run consumes:
// - candidate sets (top artist / similar artist)
// - item metadata (recording id -> recording mbid)
// - listen history (user, recording mbid -> latest listen)
// - model metadata
//
// Every read returns the whole table. A table that cannot be read is a
// DatasetUnavailable error.

pub mod clickhouse_store;

pub use clickhouse_store::ClickHouseDatasetStore;

use crate::error::{RecommendationError, Result};
use crate::models::{CandidateRow, ItemMetadataRow, ListenHistoryRow, ModelMetadata};
use async_trait::async_trait;
use std::collections::HashSet;

/// Candidate tables available in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateTable {
    TopArtist,
    SimilarArtist,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn candidate_set(&self, table: CandidateTable) -> Result<Vec<CandidateRow>>;

    async fn item_metadata(&self) -> Result<Vec<ItemMetadataRow>>;

    async fn listen_history(&self) -> Result<Vec<ListenHistoryRow>>;

    async fn model_metadata(&self) -> Result<Vec<ModelMetadata>>;
}

/// Store holding every table in memory; used for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatasetStore {
    pub top_artist_candidates: Vec<CandidateRow>,
    pub similar_artist_candidates: Vec<CandidateRow>,
    pub item_metadata: Vec<ItemMetadataRow>,
    pub listen_history: Vec<ListenHistoryRow>,
    pub model_metadata: Vec<ModelMetadata>,
    unavailable: HashSet<&'static str>,
}

impl InMemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads of `table` fail as if its path did not exist.
    pub fn mark_unavailable(mut self, table: &'static str) -> Self {
        self.unavailable.insert(table);
        self
    }

    fn check(&self, table: &'static str) -> Result<()> {
        if self.unavailable.contains(table) {
            return Err(RecommendationError::dataset_unavailable(
                table,
                "path not found",
            ));
        }
        Ok(())
    }
}

pub const TOP_ARTIST_CANDIDATES: &str = "candidate_top_artist";
pub const SIMILAR_ARTIST_CANDIDATES: &str = "candidate_similar_artist";
pub const ITEM_METADATA: &str = "item_metadata";
pub const LISTEN_HISTORY: &str = "listen_history";
pub const MODEL_METADATA: &str = "model_metadata";

#[async_trait]
impl DatasetStore for InMemoryDatasetStore {
    async fn candidate_set(&self, table: CandidateTable) -> Result<Vec<CandidateRow>> {
        match table {
            CandidateTable::TopArtist => {
                self.check(TOP_ARTIST_CANDIDATES)?;
                Ok(self.top_artist_candidates.clone())
            }
            CandidateTable::SimilarArtist => {
                self.check(SIMILAR_ARTIST_CANDIDATES)?;
                Ok(self.similar_artist_candidates.clone())
            }
        }
    }

    async fn item_metadata(&self) -> Result<Vec<ItemMetadataRow>> {
        self.check(ITEM_METADATA)?;
        Ok(self.item_metadata.clone())
    }

    async fn listen_history(&self) -> Result<Vec<ListenHistoryRow>> {
        self.check(LISTEN_HISTORY)?;
        Ok(self.listen_history.clone())
    }

    async fn model_metadata(&self) -> Result<Vec<ModelMetadata>> {
        self.check(MODEL_METADATA)?;
        Ok(self.model_metadata.clone())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Engine-local user key used for joins and predictions.
pub type InternalUserId = i64;
/// Stable user identity exposed in outbound messages.
pub type ExternalUserId = i64;
/// Engine-local recording key.
pub type ItemId = i64;

/// Row of a candidate set table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub internal_user_id: InternalUserId,
    pub item_id: ItemId,
    pub external_user_id: ExternalUserId,
}

/// A (user, item) pair eligible for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidatePair {
    pub internal_user_id: InternalUserId,
    pub item_id: ItemId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub internal_user_id: InternalUserId,
    pub item_id: ItemId,
    pub score: f64,
}

/// Nested result of the model's native top-N query for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTopItems {
    pub internal_user_id: InternalUserId,
    /// (item, raw score), best first.
    pub items: Vec<(ItemId, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserIdentity {
    pub internal_user_id: InternalUserId,
    pub external_user_id: ExternalUserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadataRow {
    pub item_id: ItemId,
    pub item_mbid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenHistoryRow {
    pub external_user_id: ExternalUserId,
    pub item_mbid: String,
    pub last_listened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_report_file: String,
    pub created_at: DateTime<Utc>,
}

/// One ranked, enriched recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    #[serde(rename = "recording_mbid")]
    pub item_mbid: String,
    pub score: f64,
    /// ISO-8601 UTC instant with millisecond precision.
    #[serde(
        rename = "latest_listened_at",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_listened_at: Option<String>,
}

/// Items for one (user, source), non-increasing by score.
pub type RankedList = Vec<RankedItem>;

/// One source's recommendations keyed by external user id.
pub type UserRankedLists = BTreeMap<ExternalUserId, RankedList>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    TopArtist,     // candidates from the user's top artists
    SimilarArtist, // candidates from artists similar to the top artists
    Raw,           // model's own top-N
}

impl RecommendationSource {
    pub const ALL: [RecommendationSource; 3] = [
        RecommendationSource::TopArtist,
        RecommendationSource::SimilarArtist,
        RecommendationSource::Raw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationSource::TopArtist => "top_artist",
            RecommendationSource::SimilarArtist => "similar_artist",
            RecommendationSource::Raw => "raw",
        }
    }
}

/// Per-user merge of all three sources. Sources without recommendations for
/// the user hold an empty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecommendationBundle {
    pub user_id: ExternalUserId,
    pub top_artist: RankedList,
    pub similar_artist: RankedList,
    pub raw: RankedList,
}

impl UserRecommendationBundle {
    pub fn empty(user_id: ExternalUserId) -> Self {
        Self {
            user_id,
            top_artist: Vec::new(),
            similar_artist: Vec::new(),
            raw: Vec::new(),
        }
    }

    pub fn source_mut(&mut self, source: RecommendationSource) -> &mut RankedList {
        match source {
            RecommendationSource::TopArtist => &mut self.top_artist,
            RecommendationSource::SimilarArtist => &mut self.similar_artist,
            RecommendationSource::Raw => &mut self.raw,
        }
    }
}

/// Distinct-user tallies per source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceUserCounts {
    pub top_artist: usize,
    pub similar_artist: usize,
    pub raw: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSummary {
    pub active_user_count: usize,
    pub top_artist_user_count: usize,
    pub similar_artist_user_count: usize,
    pub raw_user_count: usize,
    pub total_elapsed_hours: f64,
}

impl PipelineSummary {
    pub fn new(active_user_count: usize, counts: SourceUserCounts, elapsed_hours: f64) -> Self {
        Self {
            active_user_count,
            top_artist_user_count: counts.top_artist,
            similar_artist_user_count: counts.similar_artist,
            raw_user_count: counts.raw,
            total_elapsed_hours: elapsed_hours,
        }
    }
}

/// The model a run scored with, referenced from every bundle message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    pub model_id: String,
    pub model_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_item_omits_missing_listen_time() {
        let item = RankedItem {
            item_mbid: "mbid-a".to_string(),
            score: 0.5,
            last_listened_at: None,
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["recording_mbid"], "mbid-a");
        assert!(json.get("latest_listened_at").is_none());
    }

    #[test]
    fn test_bundle_source_access() {
        let mut bundle = UserRecommendationBundle::empty(7);
        bundle.source_mut(RecommendationSource::Raw).push(RankedItem {
            item_mbid: "mbid-d".to_string(),
            score: 0.7,
            last_listened_at: None,
        });

        assert!(bundle.top_artist.is_empty());
        assert!(bundle.similar_artist.is_empty());
        assert_eq!(bundle.raw.len(), 1);
    }
}

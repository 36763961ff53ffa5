// ============================================
// Outbound Messages
// ============================================
//
// A run emits one `recommendation_bundle` message per user followed by a
// single `recommendation_run_summary` message.

use crate::models::{
    ExternalUserId, ModelIdentity, PipelineSummary, RankedList, UserRecommendationBundle,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "recommendation_bundle")]
    RecommendationBundle {
        user_id: ExternalUserId,
        recommendations: BundlePayload,
    },

    #[serde(rename = "recommendation_run_summary")]
    RunSummary {
        active_user_count: usize,
        top_artist_user_count: usize,
        similar_artist_user_count: usize,
        raw_user_count: usize,
        /// Elapsed hours, two decimals.
        total_time: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlePayload {
    pub top_artist: RankedList,
    pub similar_artist: RankedList,
    pub raw: RankedList,
    pub model_id: String,
    pub model_url: String,
}

impl OutboundMessage {
    pub fn bundle(bundle: UserRecommendationBundle, model: &ModelIdentity) -> Self {
        OutboundMessage::RecommendationBundle {
            user_id: bundle.user_id,
            recommendations: BundlePayload {
                top_artist: bundle.top_artist,
                similar_artist: bundle.similar_artist,
                raw: bundle.raw,
                model_id: model.model_id.clone(),
                model_url: model.model_url.clone(),
            },
        }
    }

    pub fn summary(summary: &PipelineSummary) -> Self {
        OutboundMessage::RunSummary {
            active_user_count: summary.active_user_count,
            top_artist_user_count: summary.top_artist_user_count,
            similar_artist_user_count: summary.similar_artist_user_count,
            raw_user_count: summary.raw_user_count,
            total_time: format!("{:.2}", summary.total_elapsed_hours),
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::RecommendationBundle { .. } => "recommendation_bundle",
            OutboundMessage::RunSummary { .. } => "recommendation_run_summary",
        }
    }

    /// Partition key for transports that need one.
    pub fn key(&self) -> String {
        match self {
            OutboundMessage::RecommendationBundle { user_id, .. } => user_id.to_string(),
            OutboundMessage::RunSummary { .. } => "summary".to_string(),
        }
    }
}

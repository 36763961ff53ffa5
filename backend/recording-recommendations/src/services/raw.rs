use super::candidates::ActiveUsers;
use super::ranker::RecommendationRanker;
use crate::error::Result;
use crate::models::{Prediction, UserRankedLists, UserTopItems};
use crate::predictor::Predictor;
use tracing::debug;

/// Recommendations straight from the model's own top-N, without a candidate set.
///
/// The nested per-user results are flattened and ranked again with the same
/// limit so raw lists go through the same truncation and enrichment as the
/// candidate-based sources.
pub async fn generate_raw_recommendations(
    predictor: &dyn Predictor,
    ranker: &RecommendationRanker<'_>,
    users: &ActiveUsers,
    limit: usize,
) -> Result<UserRankedLists> {
    let nested = predictor
        .top_n_per_user(&users.internal_ids(), limit)
        .await?;

    let predictions = flatten(nested);
    debug!(rows = predictions.len(), "Flattened raw recommendations");

    ranker.rank(predictions, limit)
}

fn flatten(nested: Vec<UserTopItems>) -> Vec<Prediction> {
    nested
        .into_iter()
        .flat_map(|user| {
            let internal_user_id = user.internal_user_id;
            user.items
                .into_iter()
                .map(move |(item_id, score)| Prediction {
                    internal_user_id,
                    item_id,
                    score,
                })
        })
        .collect()
}

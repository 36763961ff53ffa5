// ============================================
// Latent Factor Model (ALS)
// ============================================
//
// A trained model is stored as `<model_dir>/<model_id>/model.json`:
//
//   {
//     "rank": 2,
//     "user_factors": [{ "id": 1, "features": [0.1, 0.2] }, ...],
//     "item_factors": [{ "id": 10, "features": [0.3, 0.4] }, ...]
//   }
//
// The predicted score of (user, item) is the dot product of their factors.

use super::{ModelRepository, Predictor};
use crate::error::{RecommendationError, Result};
use crate::models::{CandidatePair, InternalUserId, ItemId, Prediction, UserTopItems};
use async_trait::async_trait;
use ndarray::{Array2, ArrayView1};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

const MODEL_FILE: &str = "model.json";

#[derive(Debug, Deserialize)]
struct FactorFile {
    rank: usize,
    user_factors: Vec<FactorRow>,
    item_factors: Vec<FactorRow>,
}

#[derive(Debug, Deserialize)]
struct FactorRow {
    id: i64,
    features: Vec<f32>,
}

/// Dense user and item factor matrices with id lookups.
#[derive(Debug, Clone)]
pub struct FactorModel {
    user_index: HashMap<InternalUserId, usize>,
    user_factors: Array2<f32>,
    item_ids: Vec<ItemId>,
    item_index: HashMap<ItemId, usize>,
    item_factors: Array2<f32>,
}

impl FactorModel {
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        let file: FactorFile = serde_json::from_str(json).map_err(|e| e.to_string())?;

        let (user_ids, user_factors) = build_matrix("user", file.user_factors, file.rank)?;
        let (item_ids, item_factors) = build_matrix("item", file.item_factors, file.rank)?;

        Ok(Self {
            user_index: index_of(&user_ids),
            user_factors,
            item_index: index_of(&item_ids),
            item_ids,
            item_factors,
        })
    }

    pub fn rank(&self) -> usize {
        self.item_factors.ncols()
    }

    fn user_vector(&self, user: InternalUserId) -> Option<ArrayView1<'_, f32>> {
        self.user_index
            .get(&user)
            .map(|&idx| self.user_factors.row(idx))
    }

    fn predict(&self, user: InternalUserId, item: ItemId) -> Option<f64> {
        let user_vector = self.user_vector(user)?;
        let item_idx = *self.item_index.get(&item)?;
        Some(user_vector.dot(&self.item_factors.row(item_idx)) as f64)
    }

    fn top_n(&self, user: InternalUserId, n: usize) -> Option<UserTopItems> {
        let user_vector = self.user_vector(user)?;
        let scores = self.item_factors.dot(&user_vector);

        let mut items: Vec<(ItemId, f64)> = self
            .item_ids
            .iter()
            .zip(scores.iter())
            .map(|(&item_id, &score)| (item_id, score as f64))
            .collect();

        items.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.truncate(n);

        Some(UserTopItems {
            internal_user_id: user,
            items,
        })
    }
}

fn build_matrix(
    kind: &str,
    rows: Vec<FactorRow>,
    rank: usize,
) -> std::result::Result<(Vec<i64>, Array2<f32>), String> {
    let mut ids = Vec::with_capacity(rows.len());
    let mut flat = Vec::with_capacity(rows.len() * rank);

    for row in rows {
        if row.features.len() != rank {
            return Err(format!(
                "{} {} has {} features, expected {}",
                kind,
                row.id,
                row.features.len(),
                rank
            ));
        }
        ids.push(row.id);
        flat.extend(row.features);
    }

    let matrix = Array2::from_shape_vec((ids.len(), rank), flat).map_err(|e| e.to_string())?;
    Ok((ids, matrix))
}

fn index_of(ids: &[i64]) -> HashMap<i64, usize> {
    ids.iter().enumerate().map(|(idx, &id)| (id, idx)).collect()
}

#[async_trait]
impl Predictor for FactorModel {
    async fn score(&self, candidates: &[CandidatePair]) -> Result<Vec<Prediction>> {
        let predictions: Vec<Prediction> = candidates
            .iter()
            .filter_map(|pair| {
                self.predict(pair.internal_user_id, pair.item_id)
                    .map(|score| Prediction {
                        internal_user_id: pair.internal_user_id,
                        item_id: pair.item_id,
                        score,
                    })
            })
            .collect();

        debug!(
            candidates = candidates.len(),
            predictions = predictions.len(),
            "Scored candidate set"
        );
        Ok(predictions)
    }

    async fn top_n_per_user(
        &self,
        users: &[InternalUserId],
        n: usize,
    ) -> Result<Vec<UserTopItems>> {
        Ok(users.iter().filter_map(|&user| self.top_n(user, n)).collect())
    }
}

/// Loads models stored under a local directory, one sub-directory per model id.
pub struct FileModelRepository {
    model_dir: PathBuf,
}

impl FileModelRepository {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    /// Path of the model file for `model_id`. Ids that are not a single
    /// path component are rejected so a model always resolves under `model_dir`.
    pub fn model_path(&self, model_id: &str) -> std::result::Result<PathBuf, String> {
        if model_id.is_empty()
            || model_id == "."
            || model_id == ".."
            || model_id.contains(|c: char| c == '/' || c == '\\')
        {
            return Err(format!("invalid model id '{}'", model_id));
        }

        Ok(self.model_dir.join(model_id).join(MODEL_FILE))
    }

    async fn read_model(path: &Path) -> std::result::Result<FactorModel, String> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        FactorModel::from_json(&json)
    }
}

#[async_trait]
impl ModelRepository for FileModelRepository {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn Predictor>> {
        let loaded = match self.model_path(model_id) {
            Ok(path) => Self::read_model(&path).await,
            Err(diagnostic) => Err(diagnostic),
        };

        match loaded {
            Ok(model) => {
                info!(
                    model_id = model_id,
                    rank = model.rank(),
                    users = model.user_index.len(),
                    items = model.item_ids.len(),
                    "Loaded model"
                );
                Ok(Arc::new(model))
            }
            Err(diagnostic) => {
                error!(
                    model_id = model_id,
                    diagnostic = %diagnostic,
                    "Unable to load model, aborting"
                );
                Err(RecommendationError::ModelLoad {
                    model_id: model_id.to_string(),
                    diagnostic,
                })
            }
        }
    }
}

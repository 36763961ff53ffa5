/// Predictor Module
///
/// The trained collaborative-filtering model as seen by the pipeline.
///
/// # Capabilities
/// - **score**: predictions for an explicit candidate set
/// - **top_n_per_user**: the model's own best items for a set of users
///
/// Models are resolved by id through a [`ModelRepository`]; the file-backed
/// implementation loads latent factor matrices written by the trainer.
pub mod factor_model;

pub use factor_model::{FactorModel, FileModelRepository};

use crate::error::Result;
use crate::models::{CandidatePair, InternalUserId, Prediction, UserTopItems};
use async_trait::async_trait;
use std::sync::Arc;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Score every candidate pair the model knows about.
    async fn score(&self, candidates: &[CandidatePair]) -> Result<Vec<Prediction>>;

    /// Best `n` items for each of `users`, best first.
    async fn top_n_per_user(&self, users: &[InternalUserId], n: usize)
        -> Result<Vec<UserTopItems>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn Predictor>>;
}

// ============================================
// Recommendation Pipeline (推薦批處理流程)
// ============================================
//
// Runs one recommendation pass end to end:
// 1. Resolve the most recent model and load it
// 2. Read candidate sets, item metadata and listen history
// 3. Pin item metadata and the active-user set
// 4. Generate top-artist, similar-artist and raw recommendations
// 5. Release item metadata, aggregate the sources per user
// 6. Hand back the message sequence, then release the active users
//
// Stages run strictly one after another. Any failure aborts the run and no
// message is produced.

pub mod cache;

pub use cache::{PinEvent, PinEventKind, PinKey, PinRegistry, Pinned};

use crate::config::SourceLimits;
use crate::error::{RecommendationError, Result};
use crate::messages::OutboundMessage;
use crate::models::{
    CandidateRow, ExternalUserId, ModelIdentity, ModelMetadata, PipelineSummary,
    RecommendationSource, UserRankedLists,
};
use crate::predictor::{ModelRepository, Predictor};
use crate::services::{
    aggregate, generate_raw_recommendations, restrict_candidates, ActiveUsers, ItemCatalog,
    ListenHistory, RecommendationBundles, RecommendationRanker,
};
use crate::store::{CandidateTable, DatasetStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const ITEM_METADATA_CACHE: &str = "item_metadata";
pub const ACTIVE_USERS_CACHE: &str = "active_users";

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Explicit per-run state threaded through every stage.
pub struct RunContext {
    pub run_id: Uuid,
    pins: PinRegistry,
}

impl RunContext {
    fn new(pins: PinRegistry) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pins,
        }
    }

    fn pin<T>(&self, dataset: &'static str, value: T, rows: usize) -> Pinned<T> {
        Pinned::pin(&self.pins, self.run_id, dataset, value, rows)
    }
}

pub struct RecommendationPipeline {
    store: Arc<dyn DatasetStore>,
    models: Arc<dyn ModelRepository>,
    model_report_base_url: String,
    pins: PinRegistry,
}

impl RecommendationPipeline {
    pub fn new(
        store: Arc<dyn DatasetStore>,
        models: Arc<dyn ModelRepository>,
        model_report_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            models,
            model_report_base_url: model_report_base_url.into(),
            pins: PinRegistry::new(),
        }
    }

    /// Datasets currently pinned by runs of this pipeline, keyed by run.
    pub fn pinned_datasets(&self) -> Vec<PinKey> {
        self.pins.pinned()
    }

    /// Pin and release events of every run started after this call.
    pub fn pin_events(&self) -> broadcast::Receiver<PinEvent> {
        self.pins.subscribe()
    }

    /// Generate recommendations for `users` (every active user when empty).
    pub async fn run(
        &self,
        limits: SourceLimits,
        users: &BTreeSet<ExternalUserId>,
    ) -> Result<RecommendationMessages> {
        let ctx = RunContext::new(self.pins.clone());
        let span = info_span!("recommendation_run", run_id = %ctx.run_id);

        self.run_stages(&ctx, limits, users).instrument(span).await
    }

    async fn run_stages(
        &self,
        ctx: &RunContext,
        limits: SourceLimits,
        users: &BTreeSet<ExternalUserId>,
    ) -> Result<RecommendationMessages> {
        info!("Loading model...");
        let model = self.resolve_model().await?;
        let predictor = self.models.load(&model.model_id).await.map_err(|e| {
            error!(model_id = %model.model_id, error = %e, "Unable to load model");
            e
        })?;
        let started_at = Instant::now();

        let top_artist_candidates = self
            .read(self.store.candidate_set(CandidateTable::TopArtist))
            .await?;
        let similar_artist_candidates = self
            .read(self.store.candidate_set(CandidateTable::SimilarArtist))
            .await?;
        let item_rows = self.read(self.store.item_metadata()).await?;
        let listens = ListenHistory::from_rows(self.read(self.store.listen_history()).await?);

        let item_rows_count = item_rows.len();
        let catalog = ctx.pin(
            ITEM_METADATA_CACHE,
            ItemCatalog::from_rows(item_rows),
            item_rows_count,
        );

        let ts = Instant::now();
        let active_users =
            ActiveUsers::from_candidates(&top_artist_candidates, users).map_err(|e| {
                error!(error = %e, "No active users");
                e
            })?;
        let active_user_count = active_users.len();
        let active_users = ctx.pin(ACTIVE_USERS_CACHE, active_users, active_user_count);
        info!(
            active_users = active_user_count,
            "Took {:.2}sec to get active user count",
            ts.elapsed().as_secs_f64()
        );

        info!("Generating recommendations...");
        let ts = Instant::now();
        let ranker = RecommendationRanker::new(&catalog, &active_users, &listens);

        let top_artist = self
            .recommend_from_candidates(
                predictor.as_ref(),
                &ranker,
                &top_artist_candidates,
                users,
                RecommendationSource::TopArtist,
                limits,
            )
            .await?;
        let similar_artist = self
            .recommend_from_candidates(
                predictor.as_ref(),
                &ranker,
                &similar_artist_candidates,
                users,
                RecommendationSource::SimilarArtist,
                limits,
            )
            .await?;
        let raw = generate_raw_recommendations(
            predictor.as_ref(),
            &ranker,
            &active_users,
            limits.for_source(RecommendationSource::Raw),
        )
        .await
        .map_err(|e| {
            error!(source = "raw", error = %e, "Recommendations not generated");
            e
        })?;
        info!(
            "Took {:.2}sec to generate recommendations for all active users",
            ts.elapsed().as_secs_f64()
        );

        drop(ranker);
        catalog.release();

        let (bundles, counts) = aggregate(top_artist, similar_artist, raw);

        let total_secs = started_at.elapsed().as_secs_f64();
        info!("Total time: {:.2}sec", total_secs);

        let summary =
            PipelineSummary::new(active_user_count, counts, total_secs / SECONDS_PER_HOUR);
        let messages = RecommendationMessages::new(bundles, model, summary);

        active_users.release();
        Ok(messages)
    }

    async fn read<T>(&self, read: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        read.await.map_err(|e| {
            error!(error = %e, "Unable to read dataset");
            e
        })
    }

    async fn resolve_model(&self) -> Result<ModelIdentity> {
        let metadata = self.read(self.store.model_metadata()).await?;

        let latest = most_recent_model(metadata).ok_or_else(|| {
            error!("No trained model found");
            RecommendationError::Bootstrap("no model metadata found".to_string())
        })?;

        info!(model_id = %latest.model_id, created_at = %latest.created_at, "Resolved model");
        Ok(ModelIdentity {
            model_url: format!(
                "{}/{}",
                self.model_report_base_url.trim_end_matches('/'),
                latest.model_report_file
            ),
            model_id: latest.model_id,
        })
    }

    async fn recommend_from_candidates(
        &self,
        predictor: &dyn Predictor,
        ranker: &RecommendationRanker<'_>,
        candidates: &[CandidateRow],
        users: &BTreeSet<ExternalUserId>,
        source: RecommendationSource,
        limits: SourceLimits,
    ) -> Result<UserRankedLists> {
        let result: Result<UserRankedLists> = async {
            let pairs = restrict_candidates(candidates, users)?;
            let predictions = predictor.score(&pairs).await?;
            ranker.rank(predictions, limits.for_source(source))
        }
        .await;

        result.map_err(|e| {
            error!(source = source.as_str(), error = %e, "Recommendations not generated");
            e
        })
    }
}

fn most_recent_model(metadata: Vec<ModelMetadata>) -> Option<ModelMetadata> {
    metadata.into_iter().max_by_key(|meta| meta.created_at)
}

/// Lazy, single-pass message sequence: one bundle message per user, then
/// exactly one summary message.
pub struct RecommendationMessages {
    bundles: RecommendationBundles,
    model: ModelIdentity,
    summary: PipelineSummary,
    summary_pending: bool,
}

impl RecommendationMessages {
    fn new(bundles: RecommendationBundles, model: ModelIdentity, summary: PipelineSummary) -> Self {
        Self {
            bundles,
            model,
            summary,
            summary_pending: true,
        }
    }

    pub fn summary(&self) -> &PipelineSummary {
        &self.summary
    }

    pub fn model(&self) -> &ModelIdentity {
        &self.model
    }
}

impl Iterator for RecommendationMessages {
    type Item = OutboundMessage;

    fn next(&mut self) -> Option<OutboundMessage> {
        if let Some(bundle) = self.bundles.next() {
            return Some(OutboundMessage::bundle(bundle, &self.model));
        }

        if self.summary_pending {
            self.summary_pending = false;
            return Some(OutboundMessage::summary(&self.summary));
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bundles.len() + usize::from(self.summary_pending);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RecommendationMessages {}

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use recording_recommendations::models::{
    CandidatePair, CandidateRow, InternalUserId, ItemMetadataRow, ListenHistoryRow,
    ModelMetadata, Prediction, UserTopItems,
};
use recording_recommendations::{
    publish_all, FileModelRepository, InMemoryDatasetStore, JsonLinesSink, ModelRepository,
    OutboundMessage, Predictor, RecommendationError, RecommendationPipeline, Result, SourceLimits,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Predictor with fixed scores per (user, item) and fixed top-N lists.
struct FixedPredictor {
    scores: HashMap<(InternalUserId, i64), f64>,
    top_n: HashMap<InternalUserId, Vec<(i64, f64)>>,
}

#[async_trait]
impl Predictor for FixedPredictor {
    async fn score(&self, candidates: &[CandidatePair]) -> Result<Vec<Prediction>> {
        Ok(candidates
            .iter()
            .filter_map(|pair| {
                self.scores
                    .get(&(pair.internal_user_id, pair.item_id))
                    .map(|&score| Prediction {
                        internal_user_id: pair.internal_user_id,
                        item_id: pair.item_id,
                        score,
                    })
            })
            .collect())
    }

    async fn top_n_per_user(
        &self,
        users: &[InternalUserId],
        n: usize,
    ) -> Result<Vec<UserTopItems>> {
        Ok(users
            .iter()
            .filter_map(|user| {
                self.top_n.get(user).map(|items| UserTopItems {
                    internal_user_id: *user,
                    items: items.iter().take(n).copied().collect(),
                })
            })
            .collect())
    }
}

struct FixedModels(Arc<FixedPredictor>);

#[async_trait]
impl ModelRepository for FixedModels {
    async fn load(&self, _model_id: &str) -> Result<Arc<dyn Predictor>> {
        Ok(self.0.clone())
    }
}

fn candidate(internal: i64, item: i64, external: i64) -> CandidateRow {
    CandidateRow {
        internal_user_id: internal,
        item_id: item,
        external_user_id: external,
    }
}

fn item(item_id: i64, mbid: &str) -> ItemMetadataRow {
    ItemMetadataRow {
        item_id,
        item_mbid: mbid.to_string(),
    }
}

// Users: 1 -> 101, 2 -> 102, 3 -> 103
fn store() -> InMemoryDatasetStore {
    let mut store = InMemoryDatasetStore::new();
    store.top_artist_candidates = vec![
        candidate(1, 1, 101),
        candidate(1, 2, 101),
        candidate(1, 3, 101),
        candidate(2, 1, 102),
        candidate(3, 9, 103),
    ];
    store.similar_artist_candidates = vec![candidate(1, 4, 101)];
    store.item_metadata = vec![
        item(1, "mbid-a"),
        item(2, "mbid-b"),
        item(3, "mbid-c"),
        item(4, "mbid-d"),
        item(5, "mbid-e"),
        item(6, "mbid-f"),
    ];
    store.listen_history = vec![ListenHistoryRow {
        external_user_id: 101,
        item_mbid: "mbid-a".to_string(),
        last_listened_at: Utc.timestamp_millis_opt(1_609_556_645_678).unwrap(),
    }];
    store.model_metadata = vec![ModelMetadata {
        model_id: "model-1".to_string(),
        model_report_file: "model-1.html".to_string(),
        created_at: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
    }];
    store
}

fn predictor() -> FixedPredictor {
    FixedPredictor {
        scores: HashMap::from([
            ((1, 1), 0.9),
            ((1, 2), 0.5),
            ((1, 3), 0.3),
            ((1, 4), 0.8),
            ((2, 1), 0.6),
            // item 9 has no metadata
            ((3, 9), 0.7),
        ]),
        top_n: HashMap::from([
            (1, vec![(5, 0.95)]),
            (2, vec![(5, 0.6), (6, 0.4)]),
            (3, vec![(6, 0.2)]),
        ]),
    }
}

fn pipeline(store: InMemoryDatasetStore) -> RecommendationPipeline {
    RecommendationPipeline::new(
        Arc::new(store),
        Arc::new(FixedModels(Arc::new(predictor()))),
        "http://reports.local",
    )
}

fn limits(top_artist: usize, similar_artist: usize, raw: usize) -> SourceLimits {
    SourceLimits {
        top_artist,
        similar_artist,
        raw,
    }
}

fn bundles_by_user(messages: &[OutboundMessage]) -> HashMap<i64, serde_json::Value> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutboundMessage::RecommendationBundle { user_id, .. } => {
                Some((*user_id, serde_json::to_value(message).unwrap()))
            }
            OutboundMessage::RunSummary { .. } => None,
        })
        .collect()
}

fn mbids(list: &serde_json::Value) -> Vec<&str> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|item| item["recording_mbid"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_full_run_produces_bundles_then_summary() {
    let pipeline = pipeline(store());

    let messages: Vec<OutboundMessage> = pipeline
        .run(limits(2, 10, 5), &BTreeSet::new())
        .await
        .unwrap()
        .collect();

    assert!(pipeline.pinned_datasets().is_empty());

    // three users, then exactly one summary at the end
    assert_eq!(messages.len(), 4);
    let summaries = messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::RunSummary { .. }))
        .count();
    assert_eq!(summaries, 1);
    assert!(matches!(
        messages.last(),
        Some(OutboundMessage::RunSummary { .. })
    ));

    let bundles = bundles_by_user(&messages);

    let user1 = &bundles[&101]["recommendations"];
    assert_eq!(mbids(&user1["top_artist"]), vec!["mbid-a", "mbid-b"]);
    assert_eq!(
        user1["top_artist"][0]["latest_listened_at"],
        "2021-01-02T03:04:05.678Z"
    );
    assert!(user1["top_artist"][1].get("latest_listened_at").is_none());
    assert_eq!(mbids(&user1["similar_artist"]), vec!["mbid-d"]);
    assert_eq!(mbids(&user1["raw"]), vec!["mbid-e"]);
    assert_eq!(user1["model_id"], "model-1");
    assert_eq!(user1["model_url"], "http://reports.local/model-1.html");

    let user2 = &bundles[&102]["recommendations"];
    assert_eq!(mbids(&user2["top_artist"]), vec!["mbid-a"]);
    assert_eq!(user2["similar_artist"], serde_json::json!([]));
    assert_eq!(mbids(&user2["raw"]), vec!["mbid-e", "mbid-f"]);

    // user 3's only candidate has no metadata: raw recommendations only
    let user3 = &bundles[&103]["recommendations"];
    assert_eq!(user3["top_artist"], serde_json::json!([]));
    assert_eq!(user3["similar_artist"], serde_json::json!([]));
    assert_eq!(mbids(&user3["raw"]), vec!["mbid-f"]);

    match messages.last() {
        Some(OutboundMessage::RunSummary {
            active_user_count,
            top_artist_user_count,
            similar_artist_user_count,
            raw_user_count,
            total_time,
        }) => {
            assert_eq!(*active_user_count, 3);
            assert_eq!(*top_artist_user_count, 2);
            assert_eq!(*similar_artist_user_count, 1);
            assert_eq!(*raw_user_count, 3);
            assert_eq!(total_time, "0.00");
        }
        other => panic!("expected summary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_requested_users_restrict_the_run() {
    let pipeline = pipeline(store());
    let users = BTreeSet::from([101]);

    let messages: Vec<OutboundMessage> = pipeline
        .run(limits(10, 10, 10), &users)
        .await
        .unwrap()
        .collect();

    let bundles = bundles_by_user(&messages);
    assert_eq!(bundles.len(), 1);
    assert!(bundles.contains_key(&101));

    let top_artist = &bundles[&101]["recommendations"]["top_artist"];
    assert_eq!(mbids(top_artist), vec!["mbid-a", "mbid-b", "mbid-c"]);
    let scores: Vec<f64> = top_artist
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_unknown_requested_users_fail_without_messages() {
    let pipeline = pipeline(store());
    let users = BTreeSet::from([999]);

    let result = pipeline.run(limits(10, 10, 10), &users).await;

    match result {
        Err(RecommendationError::EmptyCandidateSet(msg)) => {
            assert_eq!(msg, "No active users found!")
        }
        Err(other) => panic!("expected EmptyCandidateSet, got {:?}", other),
        Ok(_) => panic!("expected EmptyCandidateSet"),
    }
    assert!(pipeline.pinned_datasets().is_empty());
}

#[tokio::test]
async fn test_empty_similar_artist_candidates_abort_the_run() {
    let mut store = store();
    store.similar_artist_candidates.clear();
    let pipeline = pipeline(store);

    let result = pipeline.run(limits(10, 10, 10), &BTreeSet::new()).await;

    assert!(matches!(
        result,
        Err(RecommendationError::EmptyCandidateSet(_))
    ));
    assert!(pipeline.pinned_datasets().is_empty());
}

#[tokio::test]
async fn test_runs_are_repeatable() {
    let pipeline = pipeline(store());

    let first: Vec<OutboundMessage> = pipeline
        .run(limits(2, 2, 2), &BTreeSet::new())
        .await
        .unwrap()
        .filter(|m| matches!(m, OutboundMessage::RecommendationBundle { .. }))
        .collect();
    let second: Vec<OutboundMessage> = pipeline
        .run(limits(2, 2, 2), &BTreeSet::new())
        .await
        .unwrap()
        .filter(|m| matches!(m, OutboundMessage::RecommendationBundle { .. }))
        .collect();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_file_backed_model_run_publishes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("model-1");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(
        model_dir.join("model.json"),
        r#"{
            "rank": 2,
            "user_factors": [
                { "id": 1, "features": [1.0, 0.0] },
                { "id": 2, "features": [0.0, 1.0] },
                { "id": 3, "features": [0.5, 0.5] }
            ],
            "item_factors": [
                { "id": 1, "features": [0.9, 0.1] },
                { "id": 2, "features": [0.2, 0.7] },
                { "id": 3, "features": [0.4, 0.4] },
                { "id": 4, "features": [0.6, 0.3] }
            ]
        }"#,
    )
    .unwrap();

    let pipeline = RecommendationPipeline::new(
        Arc::new(store()),
        Arc::new(FileModelRepository::new(dir.path())),
        "http://reports.local",
    );

    let messages = pipeline
        .run(limits(2, 2, 3), &BTreeSet::new())
        .await
        .unwrap();
    let expected = messages.len();

    let sink = JsonLinesSink::new(Vec::new());
    let sent = publish_all(&sink, messages).await.unwrap();
    assert_eq!(sent, expected);

    let output = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), sent);
    assert_eq!(lines.last().unwrap()["type"], "recommendation_run_summary");

    let user1 = lines
        .iter()
        .find(|line| line["user_id"] == 101)
        .unwrap();
    assert_eq!(user1["type"], "recommendation_bundle");
    // user 1 factors [1, 0]: scores a=0.9, c=0.4, b=0.2
    assert_eq!(
        mbids(&user1["recommendations"]["top_artist"]),
        vec!["mbid-a", "mbid-c"]
    );
    assert_eq!(
        mbids(&user1["recommendations"]["raw"]),
        vec!["mbid-a", "mbid-d", "mbid-c"]
    );
}

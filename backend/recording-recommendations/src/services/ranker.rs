// ============================================
// Recommendation Ranker
// ============================================
//
// Turns unordered predictions into per-user ranked lists:
// 1. Group predictions by user
// 2. Order each group by score (ties: item id ascending) and keep the top K
// 3. Resolve item id -> recording mbid (items without metadata are dropped)
// 4. Resolve internal -> external user id (unknown users are dropped)
// 5. Attach the latest listen time when the user already listened to the item
// 6. Sort each list by score again

use super::candidates::ActiveUsers;
use crate::error::{RecommendationError, Result};
use crate::models::{
    ExternalUserId, InternalUserId, ItemId, ItemMetadataRow, ListenHistoryRow, Prediction,
    RankedItem, RankedList, UserRankedLists,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

const LISTENED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Item id -> recording mbid lookup.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    mbids: HashMap<ItemId, String>,
}

impl ItemCatalog {
    pub fn from_rows(rows: Vec<ItemMetadataRow>) -> Self {
        Self {
            mbids: rows
                .into_iter()
                .map(|row| (row.item_id, row.item_mbid))
                .collect(),
        }
    }

    pub fn mbid(&self, item_id: ItemId) -> Option<&str> {
        self.mbids.get(&item_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mbids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mbids.is_empty()
    }
}

/// Latest listen per (user, recording mbid).
#[derive(Debug, Clone, Default)]
pub struct ListenHistory {
    latest: HashMap<(ExternalUserId, String), DateTime<Utc>>,
}

impl ListenHistory {
    pub fn from_rows(rows: Vec<ListenHistoryRow>) -> Self {
        let mut latest: HashMap<(ExternalUserId, String), DateTime<Utc>> = HashMap::new();
        for row in rows {
            latest
                .entry((row.external_user_id, row.item_mbid))
                .and_modify(|ts| *ts = (*ts).max(row.last_listened_at))
                .or_insert(row.last_listened_at);
        }
        Self { latest }
    }

    pub fn last_listened_at(&self, user_id: ExternalUserId, item_mbid: &str) -> Option<String> {
        self.latest
            .get(&(user_id, item_mbid.to_string()))
            .map(|ts| ts.format(LISTENED_AT_FORMAT).to_string())
    }
}

/// Descending by score, NaN last, ties broken by item id ascending.
fn by_score_desc(a: (ItemId, f64), b: (ItemId, f64)) -> Ordering {
    a.1.is_nan()
        .cmp(&b.1.is_nan())
        .then_with(|| b.1.total_cmp(&a.1))
        .then_with(|| a.0.cmp(&b.0))
}

pub struct RecommendationRanker<'a> {
    catalog: &'a ItemCatalog,
    users: &'a ActiveUsers,
    listens: &'a ListenHistory,
}

impl<'a> RecommendationRanker<'a> {
    pub fn new(
        catalog: &'a ItemCatalog,
        users: &'a ActiveUsers,
        listens: &'a ListenHistory,
    ) -> Self {
        Self {
            catalog,
            users,
            listens,
        }
    }

    /// Rank `predictions` into at most `limit` items per user.
    pub fn rank(&self, predictions: Vec<Prediction>, limit: usize) -> Result<UserRankedLists> {
        if predictions.is_empty() {
            error!("Recommendations not generated for any user");
            return Err(RecommendationError::RecommendationsNotGenerated(
                "Recommendations not generated!".to_string(),
            ));
        }

        let mut ranked = UserRankedLists::new();
        let mut dropped_users = 0usize;

        for (internal_user_id, items) in group_by_user(predictions) {
            let top = top_k(items, limit);

            let Some(user_id) = self.users.external_id(internal_user_id) else {
                dropped_users += 1;
                continue;
            };

            let list = self.enrich(user_id, top);
            if !list.is_empty() {
                ranked.insert(user_id, list);
            }
        }

        debug!(
            users = ranked.len(),
            dropped_users = dropped_users,
            limit = limit,
            "Ranked recommendations"
        );
        Ok(ranked)
    }

    fn enrich(&self, user_id: ExternalUserId, top: Vec<(ItemId, f64)>) -> RankedList {
        let mut seen: HashSet<&str> = HashSet::new();

        let mut list: RankedList = top
            .into_iter()
            .filter_map(|(item_id, score)| {
                let mbid = self.catalog.mbid(item_id)?;
                if !seen.insert(mbid) {
                    return None;
                }
                Some(RankedItem {
                    item_mbid: mbid.to_string(),
                    score,
                    last_listened_at: self.listens.last_listened_at(user_id, mbid),
                })
            })
            .collect();

        // stable: items with equal scores keep their item id order
        list.sort_by(|a, b| by_score_desc((0, a.score), (0, b.score)));
        list
    }
}

/// Group by user, keeping the best score of repeated (user, item) pairs.
fn group_by_user(predictions: Vec<Prediction>) -> HashMap<InternalUserId, Vec<(ItemId, f64)>> {
    let mut best: HashMap<InternalUserId, HashMap<ItemId, f64>> = HashMap::new();

    for prediction in predictions {
        best.entry(prediction.internal_user_id)
            .or_default()
            .entry(prediction.item_id)
            .and_modify(|score| {
                if by_score_desc((0, prediction.score), (0, *score)) == Ordering::Less {
                    *score = prediction.score;
                }
            })
            .or_insert(prediction.score);
    }

    best.into_iter()
        .map(|(user, items)| (user, items.into_iter().collect()))
        .collect()
}

fn top_k(mut items: Vec<(ItemId, f64)>, limit: usize) -> Vec<(ItemId, f64)> {
    items.sort_by(|a, b| by_score_desc(*a, *b));
    items.truncate(limit);
    items
}

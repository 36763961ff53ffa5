use crate::models::{
    ExternalUserId, RecommendationSource, SourceUserCounts, UserRankedLists,
    UserRecommendationBundle,
};
use std::collections::{btree_map, BTreeMap};
use tracing::info;

/// Per-user bundles under construction.
#[derive(Debug, Default)]
struct BundleAccumulator {
    bundles: BTreeMap<ExternalUserId, UserRecommendationBundle>,
}

impl BundleAccumulator {
    fn bundle_for(&mut self, user_id: ExternalUserId) -> &mut UserRecommendationBundle {
        self.bundles
            .entry(user_id)
            .or_insert_with(|| UserRecommendationBundle::empty(user_id))
    }

    /// Store every list of `source`; returns how many users contributed.
    fn merge(&mut self, source: RecommendationSource, lists: UserRankedLists) -> usize {
        let users = lists.len();
        for (user_id, list) in lists {
            *self.bundle_for(user_id).source_mut(source) = list;
        }
        users
    }
}

/// Single-pass sequence of merged bundles, one per user.
///
/// Consuming it drains the bundles; collect it first if it must be replayed.
pub struct RecommendationBundles {
    inner: btree_map::IntoValues<ExternalUserId, UserRecommendationBundle>,
}

impl Iterator for RecommendationBundles {
    type Item = UserRecommendationBundle;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RecommendationBundles {}

/// Merge the three sources into one bundle per user and count the distinct
/// users each source contributed.
pub fn aggregate(
    top_artist: UserRankedLists,
    similar_artist: UserRankedLists,
    raw: UserRankedLists,
) -> (RecommendationBundles, SourceUserCounts) {
    let mut accumulator = BundleAccumulator::default();

    let counts = SourceUserCounts {
        top_artist: accumulator.merge(RecommendationSource::TopArtist, top_artist),
        similar_artist: accumulator.merge(RecommendationSource::SimilarArtist, similar_artist),
        raw: accumulator.merge(RecommendationSource::Raw, raw),
    };

    info!(
        users = accumulator.bundles.len(),
        top_artist_users = counts.top_artist,
        similar_artist_users = counts.similar_artist,
        raw_users = counts.raw,
        "Aggregated recommendation sources"
    );

    let bundles = RecommendationBundles {
        inner: accumulator.bundles.into_values(),
    };
    (bundles, counts)
}

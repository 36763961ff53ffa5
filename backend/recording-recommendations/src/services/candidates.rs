use crate::error::{RecommendationError, Result};
use crate::models::{CandidatePair, CandidateRow, ExternalUserId, InternalUserId, UserIdentity};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error};

/// Restrict a candidate table to the pairs of the requested users.
///
/// An empty `requested_users` keeps every row. Duplicate rows collapse into
/// a single pair.
pub fn restrict_candidates(
    candidates: &[CandidateRow],
    requested_users: &BTreeSet<ExternalUserId>,
) -> Result<Vec<CandidatePair>> {
    let pairs: BTreeSet<CandidatePair> = candidates
        .iter()
        .filter(|row| requested_users.is_empty() || requested_users.contains(&row.external_user_id))
        .map(|row| CandidatePair {
            internal_user_id: row.internal_user_id,
            item_id: row.item_id,
        })
        .collect();

    if pairs.is_empty() {
        error!(
            rows = candidates.len(),
            requested_users = requested_users.len(),
            "Candidate set not found for any user"
        );
        return Err(RecommendationError::EmptyCandidateSet(
            "Empty candidate sets!".to_string(),
        ));
    }

    debug!(pairs = pairs.len(), "Restricted candidate set");
    Ok(pairs.into_iter().collect())
}

/// Users a run generates recommendations for, with their identity mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveUsers {
    identities: Vec<UserIdentity>,
    external_by_internal: HashMap<InternalUserId, ExternalUserId>,
}

impl ActiveUsers {
    /// Distinct users of the top-artist candidate table, optionally limited
    /// to `requested_users`.
    pub fn from_candidates(
        top_artist_candidates: &[CandidateRow],
        requested_users: &BTreeSet<ExternalUserId>,
    ) -> Result<Self> {
        let identities: BTreeSet<(InternalUserId, ExternalUserId)> = top_artist_candidates
            .iter()
            .filter(|row| {
                requested_users.is_empty() || requested_users.contains(&row.external_user_id)
            })
            .map(|row| (row.internal_user_id, row.external_user_id))
            .collect();

        if identities.is_empty() {
            return Err(RecommendationError::EmptyCandidateSet(
                "No active users found!".to_string(),
            ));
        }

        let identities: Vec<UserIdentity> = identities
            .into_iter()
            .map(|(internal_user_id, external_user_id)| UserIdentity {
                internal_user_id,
                external_user_id,
            })
            .collect();

        let external_by_internal = identities
            .iter()
            .map(|identity| (identity.internal_user_id, identity.external_user_id))
            .collect();

        Ok(Self {
            identities,
            external_by_internal,
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn internal_ids(&self) -> Vec<InternalUserId> {
        self.identities
            .iter()
            .map(|identity| identity.internal_user_id)
            .collect()
    }

    pub fn external_id(&self, internal_user_id: InternalUserId) -> Option<ExternalUserId> {
        self.external_by_internal.get(&internal_user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(internal: i64, item: i64, external: i64) -> CandidateRow {
        CandidateRow {
            internal_user_id: internal,
            item_id: item,
            external_user_id: external,
        }
    }

    #[test]
    fn test_restrict_without_requested_users_keeps_all() {
        let rows = vec![row(1, 10, 100), row(2, 11, 200), row(1, 10, 100)];

        let pairs = restrict_candidates(&rows, &BTreeSet::new()).unwrap();

        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_restrict_to_requested_users() {
        let rows = vec![row(1, 10, 100), row(2, 11, 200), row(2, 12, 200)];
        let requested = BTreeSet::from([200]);

        let pairs = restrict_candidates(&rows, &requested).unwrap();

        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|pair| pair.internal_user_id == 2));
    }

    #[test]
    fn test_restrict_empty_result_fails() {
        let rows = vec![row(1, 10, 100)];
        let requested = BTreeSet::from([999]);

        assert!(matches!(
            restrict_candidates(&rows, &requested),
            Err(RecommendationError::EmptyCandidateSet(_))
        ));
        assert!(matches!(
            restrict_candidates(&[], &BTreeSet::new()),
            Err(RecommendationError::EmptyCandidateSet(_))
        ));
    }

    #[test]
    fn test_active_users_are_distinct() {
        let rows = vec![row(1, 10, 100), row(1, 11, 100), row(2, 12, 200)];

        let users = ActiveUsers::from_candidates(&rows, &BTreeSet::new()).unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users.internal_ids(), vec![1, 2]);
        assert_eq!(users.external_id(2), Some(200));
        assert_eq!(users.external_id(3), None);
    }

    #[test]
    fn test_no_active_users() {
        let rows = vec![row(1, 10, 100)];
        let requested = BTreeSet::from([5]);

        match ActiveUsers::from_candidates(&rows, &requested) {
            Err(RecommendationError::EmptyCandidateSet(msg)) => {
                assert_eq!(msg, "No active users found!")
            }
            other => panic!("expected EmptyCandidateSet, got {:?}", other),
        }
    }
}

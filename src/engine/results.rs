use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{common::CandidateId, db::Candidate};
use crate::store::{BallotStore, Result};

/// One line of the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub candidate_id: CandidateId,
    pub name: String,
    pub position: String,
    pub votes: u64,
    /// Share of committed ballots that selected this candidate.
    pub percentage: f64,
}

/// Read-only projection of the committed tallies.
#[derive(Clone)]
pub struct ResultAggregator {
    store: Arc<dyn BallotStore>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn BallotStore>) -> Self {
        Self { store }
    }

    /// Rank every candidate by votes, most first.
    ///
    /// The counter and tallies are read separately, so a commit landing in
    /// between may make the figures momentarily inconsistent.
    pub async fn list_results(&self) -> Result<Vec<ResultRow>> {
        let committed = self.store.election_state().await?.committed_count;
        let candidates = self.store.candidates().await?;
        Ok(rank(candidates, committed))
    }
}

/// Sort by votes descending, keeping registration order among equal tallies.
pub fn rank(mut candidates: Vec<Candidate>, committed: u64) -> Vec<ResultRow> {
    candidates.sort_by_key(|candidate| candidate.candidate_id);
    // Stable, so ties keep registration order.
    candidates.sort_by(|a, b| b.votes.cmp(&a.votes));

    candidates
        .into_iter()
        .map(|candidate| ResultRow {
            percentage: percentage(candidate.votes, committed),
            candidate_id: candidate.candidate_id,
            name: candidate.name,
            position: candidate.position,
            votes: candidate.votes,
        })
        .collect()
}

fn percentage(votes: u64, committed: u64) -> f64 {
    if committed == 0 {
        0.0
    } else {
        votes as f64 / committed as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::db::NewCandidate;

    fn candidate(candidate_id: CandidateId, votes: u64) -> Candidate {
        let mut candidate = Candidate::register(
            candidate_id,
            NewCandidate::example(&format!("Candidate {candidate_id}")),
        );
        candidate.votes = votes;
        candidate
    }

    fn order(rows: &[ResultRow]) -> Vec<CandidateId> {
        rows.iter().map(|row| row.candidate_id).collect()
    }

    #[test]
    fn ranked_by_votes_then_registration() {
        let candidates = vec![
            candidate(4, 3),
            candidate(1, 3),
            candidate(2, 5),
            candidate(3, 0),
        ];
        let rows = rank(candidates, 6);
        assert_eq!(order(&rows), vec![2, 1, 4, 3]);
    }

    #[test]
    fn percentages_use_committed_ballots() {
        let rows = rank(vec![candidate(1, 4), candidate(2, 3), candidate(3, 1)], 4);
        assert_eq!(rows[0].percentage, 100.0);
        assert_eq!(rows[1].percentage, 75.0);
        assert_eq!(rows[2].percentage, 25.0);
        // Several selections per ballot.
        assert!(rows.iter().map(|row| row.percentage).sum::<f64>() > 100.0);
    }

    #[test]
    fn no_ballots_means_zero_percent() {
        let rows = rank(vec![candidate(1, 0), candidate(2, 0)], 0);
        assert!(rows.iter().all(|row| row.percentage == 0.0));
        assert_eq!(order(&rows), vec![1, 2]);
    }

    #[rocket::async_test]
    async fn results_reflect_commits() {
        use chrono::{Duration, Utc};

        use crate::model::db::Voter;
        use crate::store::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        for name in ["Alice", "Bob"] {
            store
                .insert_candidate(NewCandidate::example(name))
                .await
                .unwrap();
        }
        for voter_id in ["S1", "S2"] {
            store.insert_voter(Voter::example(voter_id)).await.unwrap();
            store
                .claim_voter(voter_id, Utc::now() + Duration::seconds(60))
                .await
                .unwrap();
        }
        store.commit_ballot("S1", &[2]).await.unwrap();
        store.commit_ballot("S2", &[1, 2]).await.unwrap();

        let rows = ResultAggregator::new(store).list_results().await.unwrap();
        assert_eq!(order(&rows), vec![2, 1]);
        assert_eq!(rows[0].votes, 2);
        assert_eq!(rows[0].percentage, 100.0);
        assert_eq!(rows[1].name, "Alice");
        assert_eq!(rows[1].percentage, 50.0);
    }
}

use serde::{Deserialize, Serialize};

use crate::model::common::CandidateId;

/// A candidate awaiting registration, i.e. without an ID or tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    /// Position or category the candidate stands for.
    pub position: String,
}

/// A registered candidate with its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub name: String,
    pub position: String,
    /// Only ever incremented, and only by a ballot commit.
    pub votes: u64,
}

impl Candidate {
    /// Register a new candidate under the given ID with a zero tally.
    pub fn register(candidate_id: CandidateId, candidate: NewCandidate) -> Self {
        Self {
            candidate_id,
            name: candidate.name,
            position: candidate.position,
            votes: 0,
        }
    }
}

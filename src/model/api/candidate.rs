use serde::{Deserialize, Serialize};

use crate::model::{
    common::CandidateId,
    db::candidate::{Candidate, NewCandidate},
};

/// A candidate registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub position: String,
}

impl CandidateSpec {
    /// Is this registration acceptable?
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.position.trim().is_empty()
    }
}

impl From<CandidateSpec> for NewCandidate {
    fn from(spec: CandidateSpec) -> Self {
        Self {
            name: spec.name.trim().to_string(),
            position: spec.position.trim().to_string(),
        }
    }
}

/// A candidate as shown on the ballot. Tallies are not visible to voters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDesc {
    pub candidate_id: CandidateId,
    pub name: String,
    pub position: String,
}

impl From<Candidate> for CandidateDesc {
    fn from(candidate: Candidate) -> Self {
        Self {
            candidate_id: candidate.candidate_id,
            name: candidate.name,
            position: candidate.position,
        }
    }
}

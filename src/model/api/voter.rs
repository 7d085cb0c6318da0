use serde::{Deserialize, Serialize};

use crate::model::{
    common::{VoterId, VoterStatus},
    db::voter::Voter,
};

/// A voter enrolment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterSpec {
    pub voter_id: VoterId,
    /// Defaults to the enrolling admin's username.
    #[serde(default)]
    pub group: Option<String>,
}

/// API-friendly view of a voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDesc {
    pub voter_id: VoterId,
    pub status: VoterStatus,
    pub group: Option<String>,
}

impl From<Voter> for VoterDesc {
    fn from(voter: Voter) -> Self {
        Self {
            voter_id: voter.voter_id,
            status: voter.status,
            group: voter.group,
        }
    }
}

/// A request to open a voting session, identifying the voter by admission number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub voter_id: VoterId,
}

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::model::common::{VoterId, VoterStatus};

/// An enrolled voter, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    /// Unique admission number.
    pub voter_id: VoterId,
    pub status: VoterStatus,
    /// Owning group, e.g. the admin who enrolled this voter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// When the current claim lapses. Only present while `InSession`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_deadline: Option<DateTime>,
}

impl Voter {
    /// A freshly enrolled voter who has not voted.
    pub fn new(voter_id: VoterId, group: Option<String>) -> Self {
        Self {
            voter_id,
            status: VoterStatus::NotVoted,
            group,
            claim_deadline: None,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Voter {
        pub fn example(voter_id: &str) -> Self {
            Self::new(voter_id.to_string(), Some("alice112".to_string()))
        }
    }
}

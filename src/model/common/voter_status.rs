use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// States in the voter lifecycle.
///
/// The only legal transitions are `NotVoted -> InSession`,
/// `InSession -> Voted` and `InSession -> NotVoted`. `Voted` is final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoterStatus {
    /// Enrolled and eligible to start a voting session.
    NotVoted,
    /// Holds the claim for exactly one live voting session.
    InSession,
    /// Ballot committed.
    Voted,
}

impl VoterStatus {
    /// Is `self -> next` a legal transition?
    pub fn can_become(self, next: VoterStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotVoted, Self::InSession)
                | (Self::InSession, Self::Voted)
                | (Self::InSession, Self::NotVoted)
        )
    }
}

impl Display for VoterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotVoted => "not voted",
            Self::InSession => "in session",
            Self::Voted => "voted",
        };
        write!(f, "{name}")
    }
}

impl From<VoterStatus> for Bson {
    fn from(status: VoterStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

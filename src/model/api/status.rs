use serde::{Deserialize, Serialize};

use crate::model::db::election_state::ElectionState;

/// Publicly visible election status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStatus {
    pub active: bool,
    pub committed_count: u64,
}

impl From<ElectionState> for ElectionStatus {
    fn from(state: ElectionState) -> Self {
        Self {
            active: state.active,
            committed_count: state.committed_count,
        }
    }
}

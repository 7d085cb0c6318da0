use serde::{Deserialize, Serialize};

/// The `_id` of the singleton election state document.
pub const ELECTION_STATE_ID: u32 = 1;

/// Store-wide election state.
///
/// `active` is owned by the election gate and `committed_count` by the ballot
/// committer. Nothing else writes either field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionState {
    pub active: bool,
    /// Number of committed ballots, which always equals the number of `Voted` voters.
    pub committed_count: u64,
}

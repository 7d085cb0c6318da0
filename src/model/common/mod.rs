mod voter_status;

pub use voter_status::VoterStatus;

/// Voters are identified by their admission number.
pub type VoterId = String;
/// Candidate IDs are allocated sequentially, so ascending ID order is registration order.
pub type CandidateId = u32;

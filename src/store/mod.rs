//! The storage seam of the engine.
//!
//! Every persisted operation is one [`BallotStore`] method carrying its own
//! atomicity contract. The engine never composes two store calls into what
//! it assumes to be an atomic step.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    common::{CandidateId, VoterId, VoterStatus},
    db::{Admin, Candidate, ElectionState, NewCandidate, Voter},
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the storage layer itself, as opposed to rejections of a
/// request, which are reported through the outcome types below.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Already exists: {0}")]
    Duplicate(String),
    #[error("Missing from storage: {0}")]
    Missing(String),
}

impl StoreError {
    /// Could the failed operation succeed if attempted again?
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(e) => crate::model::mongodb::is_transient_error(e),
            Self::Unavailable(_) => true,
            Self::Duplicate(_) | Self::Missing(_) => false,
        }
    }
}

/// Outcome of a conditional transition on a voter record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The precondition held and the record was updated.
    Applied,
    /// No such voter.
    Missing,
    /// The voter exists but was observed in this state, so nothing changed.
    Observed(VoterStatus),
}

/// Outcome of a ballot commit that reached storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All effects applied. Carries the committed ballot counter after this commit.
    Committed { committed_count: u64 },
    /// The voter was not `InSession`; nothing applied.
    /// Carries the observed status, or `None` if the voter does not exist.
    NotInSession(Option<VoterStatus>),
    /// A selected candidate does not exist; nothing applied.
    UnknownCandidate(CandidateId),
}

/// Outcome of deleting an admin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdminDeletion {
    Deleted,
    Missing,
    /// Refused, as at least one admin must always remain.
    LastAdmin,
}

/// Persistent storage for voters, candidates, admins and the election state.
#[rocket::async_trait]
pub trait BallotStore: Send + Sync {
    /// Read the singleton election state.
    async fn election_state(&self) -> Result<ElectionState>;

    /// Set the election's active flag. Idempotent.
    async fn set_election_active(&self, active: bool) -> Result<()>;

    /// Atomically move the voter from `NotVoted` to `InSession`, recording the
    /// claim deadline. Exactly one of any number of concurrent callers for the
    /// same voter can observe `Applied`.
    async fn claim_voter(&self, voter_id: &str, deadline: DateTime<Utc>) -> Result<Transition>;

    /// Atomically move the voter from `InSession` back to `NotVoted`.
    async fn release_voter(&self, voter_id: &str) -> Result<Transition>;

    /// In one atomic unit: increment each candidate's tally, mark the voter
    /// `Voted`, and increment the committed ballot counter. Applies all of
    /// these or none. The voter must be `InSession`.
    ///
    /// A candidate listed more than once is counted once.
    async fn commit_ballot(
        &self,
        voter_id: &str,
        candidates: &[CandidateId],
    ) -> Result<CommitOutcome>;

    /// Release every claim whose deadline is before `cutoff`, except those of
    /// the `held` voters, returning how many were released.
    async fn expire_stale_claims(&self, cutoff: DateTime<Utc>, held: &[VoterId]) -> Result<u64>;

    async fn voter(&self, voter_id: &str) -> Result<Option<Voter>>;

    /// All voters, ordered by ID.
    async fn voters(&self) -> Result<Vec<Voter>>;

    /// Enrol a voter. Fails with [`StoreError::Duplicate`] if the ID is taken.
    async fn insert_voter(&self, voter: Voter) -> Result<()>;

    /// Delete a voter, but only while `NotVoted`.
    async fn delete_voter(&self, voter_id: &str) -> Result<Transition>;

    /// All candidates in registration order.
    async fn candidates(&self) -> Result<Vec<Candidate>>;

    /// Register a candidate under a freshly allocated ID.
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate>;

    async fn admin(&self, username: &str) -> Result<Option<Admin>>;

    /// All admins, ordered by username.
    async fn admins(&self) -> Result<Vec<Admin>>;

    /// Fails with [`StoreError::Duplicate`] if the username is taken.
    async fn insert_admin(&self, admin: Admin) -> Result<()>;

    async fn delete_admin(&self, username: &str) -> Result<AdminDeletion>;
}

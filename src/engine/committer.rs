use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::common::{CandidateId, VoterId, VoterStatus};
use crate::store::{BallotStore, CommitOutcome, StoreError};

use super::claim::SessionHandle;

/// Why a ballot was not committed. Nothing was applied in any of these cases.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Ballot already committed")]
    AlreadyCommitted,
    #[error("Voter does not hold a session claim")]
    NotClaimed,
    #[error("No candidate with ID {0}")]
    UnknownCandidate(CandidateId),
    #[error("Storage temporarily unavailable: {0}")]
    Transient(StoreError),
    #[error("Storage failure: {0}")]
    Fatal(StoreError),
}

impl CommitError {
    /// May the same ballot be submitted again?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Confirmation that a ballot has been counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub voter_id: VoterId,
    pub candidates: Vec<CandidateId>,
    pub committed_at: DateTime<Utc>,
    /// Position of this ballot in commit order. Unknown if the commit went
    /// through on an attempt whose acknowledgement was lost.
    pub ballot_number: Option<u64>,
}

/// Finalises ballots.
#[derive(Clone)]
pub struct BallotCommitter {
    store: Arc<dyn BallotStore>,
}

impl BallotCommitter {
    pub fn new(store: Arc<dyn BallotStore>) -> Self {
        Self { store }
    }

    /// Commit the ballot of the claimed voter: all tallies, the voter's
    /// status and the committed ballot counter change together or not at all.
    ///
    /// A transient failure is retried once before being reported. The claim
    /// stays held after any failure.
    pub async fn commit(
        &self,
        handle: &SessionHandle,
        ballot: &[CandidateId],
    ) -> Result<CommitReceipt, CommitError> {
        let voter_id = &handle.voter_id;
        let ballot_number = match self.attempt(voter_id, ballot).await {
            Err(CommitError::Transient(e)) => {
                warn!("Commit for voter {voter_id} failed transiently ({e}), retrying once");
                match self.attempt(voter_id, ballot).await {
                    // Only this session can have moved the voter to `Voted`,
                    // so the first attempt did land after all.
                    Err(CommitError::AlreadyCommitted) => None,
                    other => other?,
                }
            }
            other => other?,
        };

        debug!("Committed ballot for voter {voter_id}: {ballot:?}");
        Ok(CommitReceipt {
            voter_id: voter_id.clone(),
            candidates: ballot.to_vec(),
            committed_at: Utc::now(),
            ballot_number,
        })
    }

    async fn attempt(
        &self,
        voter_id: &str,
        ballot: &[CandidateId],
    ) -> Result<Option<u64>, CommitError> {
        match self.store.commit_ballot(voter_id, ballot).await {
            Ok(CommitOutcome::Committed { committed_count }) => Ok(Some(committed_count)),
            Ok(CommitOutcome::NotInSession(Some(VoterStatus::Voted))) => {
                Err(CommitError::AlreadyCommitted)
            }
            Ok(CommitOutcome::NotInSession(_)) => Err(CommitError::NotClaimed),
            Ok(CommitOutcome::UnknownCandidate(id)) => Err(CommitError::UnknownCandidate(id)),
            Err(e) if e.is_transient() => Err(CommitError::Transient(e)),
            Err(e) => {
                error!("Commit for voter {voter_id} failed: {e}");
                Err(CommitError::Fatal(e))
            }
        }
    }
}

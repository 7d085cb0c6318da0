use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::common::{VoterId, VoterStatus};
use crate::store::{BallotStore, StoreError, Transition};

use super::gate::ElectionGate;

/// Why a voter could not be claimed. Nothing is mutated in any of these cases.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("The election is not active")]
    ElectionInactive,
    #[error("No voter with ID {0}")]
    NotFound(VoterId),
    #[error("Voter {0} has already voted")]
    AlreadyVoted(VoterId),
    #[error("Voter {0} already has a session in progress")]
    AlreadyInProgress(VoterId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Proof of a successful claim: the voter is `InSession` until `deadline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub voter_id: VoterId,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Reserves a voter for exactly one live session.
#[derive(Clone)]
pub struct EligibilityClaim {
    gate: ElectionGate,
    store: Arc<dyn BallotStore>,
}

impl EligibilityClaim {
    pub fn new(gate: ElectionGate, store: Arc<dyn BallotStore>) -> Self {
        Self { gate, store }
    }

    /// Claim the voter for a session lasting `window` from now.
    ///
    /// The store's conditional update decides every race: of any number of
    /// concurrent callers for one voter, exactly one gets a handle.
    pub async fn try_claim(
        &self,
        voter_id: &str,
        window: Duration,
    ) -> Result<SessionHandle, ClaimError> {
        if !self.gate.is_active().await? {
            return Err(ClaimError::ElectionInactive);
        }

        let started_at = Utc::now();
        let deadline = started_at + window;
        match self.store.claim_voter(voter_id, deadline).await? {
            Transition::Applied => {
                debug!("Claimed voter {voter_id} until {deadline}");
                Ok(SessionHandle {
                    voter_id: voter_id.to_string(),
                    started_at,
                    deadline,
                })
            }
            Transition::Missing => Err(ClaimError::NotFound(voter_id.to_string())),
            Transition::Observed(VoterStatus::Voted) => {
                Err(ClaimError::AlreadyVoted(voter_id.to_string()))
            }
            // A `NotVoted` observation means the claim lost a race with a
            // session that has since been released; report it as in progress.
            Transition::Observed(VoterStatus::InSession | VoterStatus::NotVoted) => {
                Err(ClaimError::AlreadyInProgress(voter_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::tokio;

    use super::*;

    use crate::model::db::Voter;
    use crate::store::MemoryStore;

    async fn claimer(active: bool) -> (EligibilityClaim, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_voter(Voter::example("S1")).await.unwrap();
        store.insert_voter(Voter::example("S2")).await.unwrap();
        let gate = ElectionGate::new(store.clone());
        gate.set_active(active).await.unwrap();
        (EligibilityClaim::new(gate, store.clone()), store)
    }

    #[rocket::async_test]
    async fn inactive_election_rejects_claims() {
        let (claimer, store) = claimer(false).await;

        let err = claimer
            .try_claim("S1", Duration::seconds(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::ElectionInactive));
        assert_eq!(
            store.voter("S1").await.unwrap().unwrap().status,
            VoterStatus::NotVoted
        );
    }

    #[rocket::async_test]
    async fn claim_reports_voter_state() {
        let (claimer, store) = claimer(true).await;

        let handle = claimer
            .try_claim("S1", Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(handle.voter_id, "S1");
        assert_eq!(handle.deadline - handle.started_at, Duration::seconds(60));

        assert!(matches!(
            claimer.try_claim("S1", Duration::seconds(60)).await,
            Err(ClaimError::AlreadyInProgress(_))
        ));
        assert!(matches!(
            claimer.try_claim("nobody", Duration::seconds(60)).await,
            Err(ClaimError::NotFound(_))
        ));

        store.commit_ballot("S1", &[]).await.unwrap();
        assert!(matches!(
            claimer.try_claim("S1", Duration::seconds(60)).await,
            Err(ClaimError::AlreadyVoted(_))
        ));
    }

    #[rocket::async_test]
    async fn simultaneous_claims_have_one_winner() {
        let (claimer, store) = claimer(true).await;

        let first = {
            let claimer = claimer.clone();
            tokio::spawn(async move { claimer.try_claim("S2", Duration::seconds(60)).await })
        };
        let second = {
            let claimer = claimer.clone();
            tokio::spawn(async move { claimer.try_claim("S2", Duration::seconds(60)).await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ClaimError::AlreadyInProgress(_)))));
        assert_eq!(
            store.voter("S2").await.unwrap().unwrap().status,
            VoterStatus::InSession
        );
    }
}

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use rocket::tokio::sync::Mutex;

use crate::model::{
    common::{CandidateId, VoterId, VoterStatus},
    db::{Admin, Candidate, ElectionState, NewCandidate, Voter},
};

use super::{AdminDeletion, BallotStore, CommitOutcome, Result, StoreError, Transition};

/// Everything the store holds, guarded as a unit.
#[derive(Debug, Default)]
struct Tables {
    election: ElectionState,
    voters: BTreeMap<VoterId, Voter>,
    candidates: BTreeMap<CandidateId, Candidate>,
    admins: BTreeMap<String, Admin>,
    last_candidate_id: CandidateId,
    /// Number of upcoming commits that will fail as if storage were unreachable.
    #[cfg(test)]
    failing_commits: u32,
}

/// An in-process [`BallotStore`].
///
/// Every method runs as a single critical section over all tables, which
/// makes each one trivially atomic and serialisable with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a transient error.
    #[cfg(test)]
    pub async fn fail_next_commits(&self, count: u32) {
        self.tables.lock().await.failing_commits = count;
    }
}

#[rocket::async_trait]
impl BallotStore for MemoryStore {
    async fn election_state(&self) -> Result<ElectionState> {
        Ok(self.tables.lock().await.election)
    }

    async fn set_election_active(&self, active: bool) -> Result<()> {
        self.tables.lock().await.election.active = active;
        Ok(())
    }

    async fn claim_voter(&self, voter_id: &str, deadline: DateTime<Utc>) -> Result<Transition> {
        let mut tables = self.tables.lock().await;
        let voter = match tables.voters.get_mut(voter_id) {
            Some(voter) => voter,
            None => return Ok(Transition::Missing),
        };
        if !voter.status.can_become(VoterStatus::InSession) {
            return Ok(Transition::Observed(voter.status));
        }
        voter.status = VoterStatus::InSession;
        voter.claim_deadline = Some(BsonDateTime::from_chrono(deadline));
        Ok(Transition::Applied)
    }

    async fn release_voter(&self, voter_id: &str) -> Result<Transition> {
        let mut tables = self.tables.lock().await;
        let voter = match tables.voters.get_mut(voter_id) {
            Some(voter) => voter,
            None => return Ok(Transition::Missing),
        };
        if !voter.status.can_become(VoterStatus::NotVoted) {
            return Ok(Transition::Observed(voter.status));
        }
        voter.status = VoterStatus::NotVoted;
        voter.claim_deadline = None;
        Ok(Transition::Applied)
    }

    async fn commit_ballot(
        &self,
        voter_id: &str,
        candidates: &[CandidateId],
    ) -> Result<CommitOutcome> {
        let mut tables = self.tables.lock().await;

        #[cfg(test)]
        if tables.failing_commits > 0 {
            tables.failing_commits -= 1;
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        // Check every precondition before touching anything, so a rejection applies nothing.
        match tables.voters.get(voter_id).map(|voter| voter.status) {
            Some(status) if status.can_become(VoterStatus::Voted) => {}
            observed => return Ok(CommitOutcome::NotInSession(observed)),
        }
        if let Some(unknown) = candidates
            .iter()
            .find(|id| !tables.candidates.contains_key(*id))
        {
            return Ok(CommitOutcome::UnknownCandidate(*unknown));
        }

        let ballot = candidates.iter().collect::<BTreeSet<_>>();
        for id in ballot {
            if let Some(candidate) = tables.candidates.get_mut(id) {
                candidate.votes += 1;
            }
        }
        if let Some(voter) = tables.voters.get_mut(voter_id) {
            voter.status = VoterStatus::Voted;
            voter.claim_deadline = None;
        }
        tables.election.committed_count += 1;

        Ok(CommitOutcome::Committed {
            committed_count: tables.election.committed_count,
        })
    }

    async fn expire_stale_claims(&self, cutoff: DateTime<Utc>, held: &[VoterId]) -> Result<u64> {
        let cutoff = BsonDateTime::from_chrono(cutoff);
        let mut tables = self.tables.lock().await;
        let mut released = 0;
        for voter in tables.voters.values_mut() {
            let stale = voter.status.can_become(VoterStatus::NotVoted)
                && voter.claim_deadline.map_or(false, |deadline| deadline < cutoff)
                && !held.contains(&voter.voter_id);
            if stale {
                voter.status = VoterStatus::NotVoted;
                voter.claim_deadline = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn voter(&self, voter_id: &str) -> Result<Option<Voter>> {
        Ok(self.tables.lock().await.voters.get(voter_id).cloned())
    }

    async fn voters(&self) -> Result<Vec<Voter>> {
        Ok(self.tables.lock().await.voters.values().cloned().collect())
    }

    async fn insert_voter(&self, voter: Voter) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.voters.contains_key(&voter.voter_id) {
            return Err(StoreError::Duplicate(format!("voter {}", voter.voter_id)));
        }
        tables.voters.insert(voter.voter_id.clone(), voter);
        Ok(())
    }

    async fn delete_voter(&self, voter_id: &str) -> Result<Transition> {
        let mut tables = self.tables.lock().await;
        match tables.voters.get(voter_id).map(|voter| voter.status) {
            None => Ok(Transition::Missing),
            Some(VoterStatus::NotVoted) => {
                tables.voters.remove(voter_id);
                Ok(Transition::Applied)
            }
            Some(status) => Ok(Transition::Observed(status)),
        }
    }

    async fn candidates(&self) -> Result<Vec<Candidate>> {
        Ok(self.tables.lock().await.candidates.values().cloned().collect())
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let mut tables = self.tables.lock().await;
        tables.last_candidate_id += 1;
        let candidate = Candidate::register(tables.last_candidate_id, candidate);
        tables
            .candidates
            .insert(candidate.candidate_id, candidate.clone());
        Ok(candidate)
    }

    async fn admin(&self, username: &str) -> Result<Option<Admin>> {
        Ok(self.tables.lock().await.admins.get(username).cloned())
    }

    async fn admins(&self) -> Result<Vec<Admin>> {
        Ok(self.tables.lock().await.admins.values().cloned().collect())
    }

    async fn insert_admin(&self, admin: Admin) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.admins.contains_key(&admin.username) {
            return Err(StoreError::Duplicate(format!("admin {}", admin.username)));
        }
        tables.admins.insert(admin.username.clone(), admin);
        Ok(())
    }

    async fn delete_admin(&self, username: &str) -> Result<AdminDeletion> {
        let mut tables = self.tables.lock().await;
        if !tables.admins.contains_key(username) {
            return Ok(AdminDeletion::Missing);
        }
        if tables.admins.len() == 1 {
            return Ok(AdminDeletion::LastAdmin);
        }
        tables.admins.remove(username);
        Ok(AdminDeletion::Deleted)
    }
}

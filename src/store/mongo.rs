use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    error::UNKNOWN_TRANSACTION_COMMIT_RESULT,
    options::{
        Acknowledgment, FindOneAndUpdateOptions, FindOptions, ReadConcern, ReturnDocument,
        TransactionOptions, UpdateOptions, WriteConcern,
    },
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::model::{
    common::{CandidateId, VoterId, VoterStatus},
    db::{
        election_state::ELECTION_STATE_ID, Admin, Candidate, ElectionState, NewCandidate, Voter,
    },
    mongodb::{
        ensure_election_state_exists, ensure_indexes_exist, is_duplicate_key_error,
        is_transaction_conflict, Coll, Counter, CANDIDATE_ID_COUNTER_ID,
    },
};

use super::{AdminDeletion, BallotStore, CommitOutcome, Result, StoreError, Transition};

/// How long a ballot commit keeps rerunning transactions that lost to concurrent ones.
const COMMIT_RETRY_LIMIT: Duration = Duration::from_secs(10);

/// A [`BallotStore`] backed by MongoDB.
///
/// Ballot commits and admin deletion run as multi-document transactions,
/// so the server must be a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to the given server, and prepare the named database for use.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        ensure_election_state_exists(&db).await?;
        info!("Using MongoDB database {db_name}");
        Ok(Self { client, db })
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn voter_coll(&self) -> Coll<Voter> {
        Coll::from_db(&self.db)
    }

    fn candidate_coll(&self) -> Coll<Candidate> {
        Coll::from_db(&self.db)
    }

    fn admin_coll(&self) -> Coll<Admin> {
        Coll::from_db(&self.db)
    }

    fn election_coll(&self) -> Coll<ElectionState> {
        Coll::from_db(&self.db)
    }

    /// Start a session with a snapshot, majority-acknowledged transaction open on it.
    async fn start_transaction(&self) -> Result<ClientSession> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;
        Ok(session)
    }

    /// Commit the open transaction, retrying while its result is unknown.
    async fn finish_transaction(session: &mut ClientSession, give_up_at: Instant) -> Result<()> {
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e)
                    if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && Instant::now() < give_up_at =>
                {
                    debug!("Transaction commit result unknown, retrying commit");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Work out why a conditional update on a voter matched nothing.
    async fn observe_voter(&self, voter_id: &str) -> Result<Transition> {
        Ok(match self.voter_coll().find_one(doc! { "voter_id": voter_id }, None).await? {
            Some(voter) => Transition::Observed(voter.status),
            None => Transition::Missing,
        })
    }

    /// The body of a ballot commit, run inside the given transaction.
    /// Any outcome other than `Committed` leaves the transaction to be aborted.
    async fn commit_in(
        &self,
        session: &mut ClientSession,
        voter_id: &str,
        candidates: &[CandidateId],
    ) -> Result<CommitOutcome> {
        // Every selected candidate must exist.
        let filter = doc! { "candidate_id": { "$in": candidates } };
        let known: Vec<CandidateId> = self
            .candidate_coll()
            .find_with_session(filter.clone(), None, session)
            .await?
            .stream(session)
            .map_ok(|candidate| candidate.candidate_id)
            .try_collect()
            .await?;
        if let Some(unknown) = candidates.iter().find(|id| !known.contains(id)) {
            return Ok(CommitOutcome::UnknownCandidate(*unknown));
        }

        // Consume the claim.
        let claimed = doc! {
            "voter_id": voter_id,
            "status": VoterStatus::InSession,
        };
        let update = doc! {
            "$set": { "status": VoterStatus::Voted },
            "$unset": { "claim_deadline": "" },
        };
        let result = self
            .voter_coll()
            .update_one_with_session(claimed, update, None, session)
            .await?;
        if result.matched_count == 0 {
            let observed = self
                .voter_coll()
                .find_one_with_session(doc! { "voter_id": voter_id }, None, session)
                .await?
                .map(|voter| voter.status);
            return Ok(CommitOutcome::NotInSession(observed));
        }

        // Count the selections.
        self.candidate_coll()
            .update_many_with_session(filter, doc! { "$inc": { "votes": 1_i64 } }, None, session)
            .await?;

        // Count the ballot.
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let state = self
            .election_coll()
            .find_one_and_update_with_session(
                doc! { "_id": ELECTION_STATE_ID },
                doc! { "$inc": { "committed_count": 1_i64 } },
                options,
                session,
            )
            .await?
            .ok_or_else(|| StoreError::Missing("election state".to_string()))?;

        Ok(CommitOutcome::Committed {
            committed_count: state.committed_count,
        })
    }
}

#[rocket::async_trait]
impl BallotStore for MongoStore {
    async fn election_state(&self) -> Result<ElectionState> {
        self.election_coll()
            .find_one(doc! { "_id": ELECTION_STATE_ID }, None)
            .await?
            .ok_or_else(|| StoreError::Missing("election state".to_string()))
    }

    async fn set_election_active(&self, active: bool) -> Result<()> {
        let update = doc! {
            "$set": { "active": active },
            "$setOnInsert": { "committed_count": 0_i64 },
        };
        let options = UpdateOptions::builder().upsert(true).build();
        self.election_coll()
            .update_one(doc! { "_id": ELECTION_STATE_ID }, update, options)
            .await?;
        Ok(())
    }

    async fn claim_voter(&self, voter_id: &str, deadline: DateTime<Utc>) -> Result<Transition> {
        let filter = doc! {
            "voter_id": voter_id,
            "status": VoterStatus::NotVoted,
        };
        let update = doc! {
            "$set": {
                "status": VoterStatus::InSession,
                "claim_deadline": BsonDateTime::from_chrono(deadline),
            }
        };
        match self.voter_coll().find_one_and_update(filter, update, None).await? {
            Some(_) => Ok(Transition::Applied),
            None => self.observe_voter(voter_id).await,
        }
    }

    async fn release_voter(&self, voter_id: &str) -> Result<Transition> {
        let filter = doc! {
            "voter_id": voter_id,
            "status": VoterStatus::InSession,
        };
        let update = doc! {
            "$set": { "status": VoterStatus::NotVoted },
            "$unset": { "claim_deadline": "" },
        };
        match self.voter_coll().find_one_and_update(filter, update, None).await? {
            Some(_) => Ok(Transition::Applied),
            None => self.observe_voter(voter_id).await,
        }
    }

    async fn commit_ballot(
        &self,
        voter_id: &str,
        candidates: &[CandidateId],
    ) -> Result<CommitOutcome> {
        // Every commit increments the shared ballot counter, so concurrent
        // commits conflict routinely. Rerun the transaction until it wins.
        let give_up_at = Instant::now() + COMMIT_RETRY_LIMIT;
        loop {
            let mut session = self.start_transaction().await?;
            let result = match self.commit_in(&mut session, voter_id, candidates).await {
                Ok(CommitOutcome::Committed { committed_count }) => {
                    Self::finish_transaction(&mut session, give_up_at)
                        .await
                        .map(|()| CommitOutcome::Committed { committed_count })
                }
                Ok(outcome) => {
                    debug!("Ballot for voter {voter_id} rejected: {outcome:?}");
                    session.abort_transaction().await?;
                    return Ok(outcome);
                }
                Err(e) => {
                    // Best effort: the server aborts abandoned transactions anyway.
                    let _ = session.abort_transaction().await;
                    Err(e)
                }
            };

            match result {
                Err(StoreError::Db(e))
                    if is_transaction_conflict(&e) && Instant::now() < give_up_at =>
                {
                    debug!("Ballot transaction for voter {voter_id} conflicted, rerunning: {e}");
                }
                Err(StoreError::Db(e)) if is_transaction_conflict(&e) => {
                    warn!("Ballot transaction for voter {voter_id} kept conflicting, giving up");
                    return Err(StoreError::Db(e));
                }
                other => return other,
            }
        }
    }

    async fn expire_stale_claims(&self, cutoff: DateTime<Utc>, held: &[VoterId]) -> Result<u64> {
        let filter = doc! {
            "voter_id": { "$nin": held },
            "status": VoterStatus::InSession,
            "claim_deadline": { "$lt": BsonDateTime::from_chrono(cutoff) },
        };
        let update = doc! {
            "$set": { "status": VoterStatus::NotVoted },
            "$unset": { "claim_deadline": "" },
        };
        let result = self.voter_coll().update_many(filter, update, None).await?;
        Ok(result.modified_count)
    }

    async fn voter(&self, voter_id: &str) -> Result<Option<Voter>> {
        Ok(self
            .voter_coll()
            .find_one(doc! { "voter_id": voter_id }, None)
            .await?)
    }

    async fn voters(&self) -> Result<Vec<Voter>> {
        let options = FindOptions::builder().sort(doc! { "voter_id": 1 }).build();
        Ok(self.voter_coll().find(None, options).await?.try_collect().await?)
    }

    async fn insert_voter(&self, voter: Voter) -> Result<()> {
        match self.voter_coll().insert_one(&voter, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                Err(StoreError::Duplicate(format!("voter {}", voter.voter_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_voter(&self, voter_id: &str) -> Result<Transition> {
        let filter = doc! {
            "voter_id": voter_id,
            "status": VoterStatus::NotVoted,
        };
        let result = self.voter_coll().delete_one(filter, None).await?;
        if result.deleted_count == 1 {
            Ok(Transition::Applied)
        } else {
            self.observe_voter(voter_id).await
        }
    }

    async fn candidates(&self) -> Result<Vec<Candidate>> {
        let options = FindOptions::builder()
            .sort(doc! { "candidate_id": 1 })
            .build();
        Ok(self
            .candidate_coll()
            .find(None, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let id = Counter::next(&Coll::from_db(&self.db), CANDIDATE_ID_COUNTER_ID).await?;
        let candidate = Candidate::register(id, candidate);
        self.candidate_coll().insert_one(&candidate, None).await?;
        Ok(candidate)
    }

    async fn admin(&self, username: &str) -> Result<Option<Admin>> {
        Ok(self
            .admin_coll()
            .find_one(doc! { "username": username }, None)
            .await?)
    }

    async fn admins(&self) -> Result<Vec<Admin>> {
        let options = FindOptions::builder().sort(doc! { "username": 1 }).build();
        Ok(self.admin_coll().find(None, options).await?.try_collect().await?)
    }

    async fn insert_admin(&self, admin: Admin) -> Result<()> {
        match self.admin_coll().insert_one(&admin, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                Err(StoreError::Duplicate(format!("admin {}", admin.username)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_admin(&self, username: &str) -> Result<AdminDeletion> {
        let mut session = self.start_transaction().await?;
        let admins = self.admin_coll();

        let filter = doc! { "username": username };
        let outcome = if admins
            .find_one_with_session(filter.clone(), None, &mut session)
            .await?
            .is_none()
        {
            AdminDeletion::Missing
        } else if admins
            .count_documents_with_session(None, None, &mut session)
            .await?
            <= 1
        {
            AdminDeletion::LastAdmin
        } else {
            admins
                .delete_one_with_session(filter, None, &mut session)
                .await?;
            AdminDeletion::Deleted
        };

        if outcome == AdminDeletion::Deleted {
            session.commit_transaction().await?;
        } else {
            session.abort_transaction().await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::tokio;

    use super::*;

    async fn enrol(store: &MongoStore, voters: &[&str], candidates: &[&str]) {
        for voter in voters {
            store.insert_voter(Voter::example(voter)).await.unwrap();
        }
        for name in candidates {
            store
                .insert_candidate(NewCandidate::example(name))
                .await
                .unwrap();
        }
    }

    #[backend_test(mongo)]
    async fn election_state_starts_inactive(store: MongoStore) {
        let state = store.election_state().await.unwrap();
        assert!(!state.active);
        assert_eq!(state.committed_count, 0);

        store.set_election_active(true).await.unwrap();
        assert!(store.election_state().await.unwrap().active);
    }

    #[backend_test(mongo)]
    async fn claim_and_release(store: MongoStore) {
        enrol(&store, &["S1"], &[]).await;
        let deadline = Utc::now() + Duration::seconds(60);

        assert_eq!(
            store.claim_voter("S1", deadline).await.unwrap(),
            Transition::Applied
        );
        assert_eq!(
            store.claim_voter("S1", deadline).await.unwrap(),
            Transition::Observed(VoterStatus::InSession)
        );
        assert_eq!(
            store.claim_voter("S9", deadline).await.unwrap(),
            Transition::Missing
        );

        assert_eq!(store.release_voter("S1").await.unwrap(), Transition::Applied);
        let voter = store.voter("S1").await.unwrap().unwrap();
        assert_eq!(voter.status, VoterStatus::NotVoted);
        assert_eq!(voter.claim_deadline, None);
    }

    #[backend_test(mongo)]
    async fn commit_is_all_or_nothing(store: MongoStore) {
        enrol(&store, &["S1"], &["Alice", "Bob"]).await;
        store
            .claim_voter("S1", Utc::now() + Duration::seconds(60))
            .await
            .unwrap();

        assert_eq!(
            store.commit_ballot("S1", &[1, 7]).await.unwrap(),
            CommitOutcome::UnknownCandidate(7)
        );
        assert_eq!(store.candidates().await.unwrap()[0].votes, 0);
        assert_eq!(
            store.voter("S1").await.unwrap().unwrap().status,
            VoterStatus::InSession
        );

        // A repeated candidate is counted once.
        assert_eq!(
            store.commit_ballot("S1", &[1, 2, 2]).await.unwrap(),
            CommitOutcome::Committed { committed_count: 1 }
        );
        assert_eq!(
            store.commit_ballot("S1", &[1]).await.unwrap(),
            CommitOutcome::NotInSession(Some(VoterStatus::Voted))
        );

        let votes = store
            .candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.votes)
            .collect::<Vec<_>>();
        assert_eq!(votes, vec![1, 1]);
        assert_eq!(store.election_state().await.unwrap().committed_count, 1);
    }

    #[backend_test(mongo)]
    async fn concurrent_commits_are_all_counted(store: MongoStore) {
        const VOTERS: usize = 12;
        let ids = (0..VOTERS).map(|i| format!("S{i}")).collect::<Vec<_>>();
        let id_refs = ids.iter().map(String::as_str).collect::<Vec<_>>();
        enrol(&store, &id_refs, &["Alice", "Bob"]).await;
        for id in &ids {
            store
                .claim_voter(id, Utc::now() + Duration::seconds(60))
                .await
                .unwrap();
        }

        // Everyone votes for Alice; every other voter also votes for Bob.
        let tasks = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let store = store.clone();
                let id = id.clone();
                let ballot = if i % 2 == 0 { vec![1, 2] } else { vec![1] };
                tokio::spawn(async move { store.commit_ballot(&id, &ballot).await.unwrap() })
            })
            .collect::<Vec<_>>();
        let mut ballot_numbers = vec![];
        for task in tasks {
            match task.await.unwrap() {
                CommitOutcome::Committed { committed_count } => ballot_numbers.push(committed_count),
                other => panic!("ballot not committed: {other:?}"),
            }
        }
        ballot_numbers.sort_unstable();
        assert_eq!(ballot_numbers, (1..=VOTERS as u64).collect::<Vec<_>>());

        let votes = store
            .candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.votes)
            .collect::<Vec<_>>();
        assert_eq!(votes, vec![VOTERS as u64, (VOTERS / 2) as u64]);
        let voted = store
            .voters()
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.status == VoterStatus::Voted)
            .count();
        assert_eq!(voted, VOTERS);
        assert_eq!(
            store.election_state().await.unwrap().committed_count,
            VOTERS as u64
        );
    }

    #[backend_test(mongo)]
    async fn stale_claims_are_released(store: MongoStore) {
        enrol(&store, &["S1", "S2"], &[]).await;
        let now = Utc::now();
        store
            .claim_voter("S1", now - Duration::seconds(10))
            .await
            .unwrap();
        store
            .claim_voter("S2", now + Duration::seconds(10))
            .await
            .unwrap();

        assert_eq!(store.expire_stale_claims(now, &[]).await.unwrap(), 1);
        assert_eq!(
            store.voter("S1").await.unwrap().unwrap().status,
            VoterStatus::NotVoted
        );
        assert_eq!(
            store.voter("S2").await.unwrap().unwrap().status,
            VoterStatus::InSession
        );

        // Held claims are kept however stale.
        let later = now + Duration::seconds(60);
        let held = ["S2".to_string()];
        assert_eq!(store.expire_stale_claims(later, &held).await.unwrap(), 0);
        assert_eq!(
            store.voter("S2").await.unwrap().unwrap().status,
            VoterStatus::InSession
        );
    }

    #[backend_test(mongo)]
    async fn duplicates_are_reported(store: MongoStore) {
        enrol(&store, &["S1"], &[]).await;
        assert!(matches!(
            store.insert_voter(Voter::example("S1")).await,
            Err(StoreError::Duplicate(_))
        ));

        store.insert_admin(Admin::example()).await.unwrap();
        assert!(matches!(
            store.insert_admin(Admin::example()).await,
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(
            store
                .delete_admin(&Admin::example().username)
                .await
                .unwrap(),
            AdminDeletion::LastAdmin
        );
    }
}

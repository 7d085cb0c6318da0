use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{IndexOptions, UpdateOptions},
    Collection, Database, IndexModel,
};

use crate::model::db::{
    admin::Admin,
    candidate::Candidate,
    election_state::{ElectionState, ELECTION_STATE_ID},
    voter::Voter,
};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Admin {
    const NAME: &'static str = "admins";
}

impl MongoCollection for Voter {
    const NAME: &'static str = "voters";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

impl MongoCollection for ElectionState {
    const NAME: &'static str = "election_state";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    let voter_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    // Serves the stale claim sweep.
    let claim_index = IndexModel::builder()
        .keys(doc! {"status": 1, "claim_deadline": 1})
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(claim_index, None)
        .await?;

    let candidate_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    let admin_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique)
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    Ok(())
}

/// Ensure the singleton election state document exists, starting inactive
/// with no committed ballots.
///
/// This operation is idempotent and never resets an existing document.
pub async fn ensure_election_state_exists(db: &Database) -> Result<(), DbError> {
    let filter = doc! { "_id": ELECTION_STATE_ID };
    let update = doc! {
        "$setOnInsert": {
            "active": false,
            "committed_count": 0_i64,
        }
    };
    let options = UpdateOptions::builder().upsert(true).build();
    Coll::<ElectionState>::from_db(db)
        .update_one(filter, update, options)
        .await?;
    Ok(())
}

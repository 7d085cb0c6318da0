use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Coll;
use crate::store::{Result, StoreError};

/// The ID of the counter that allocates candidate IDs.
pub const CANDIDATE_ID_COUNTER_ID: &str = "candidate_id";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    /// The most recently allocated value.
    pub value: u32,
}

impl Counter {
    /// Atomically allocate the next value of the counter with the given ID.
    ///
    /// A missing counter is created on first use, so the first value is 1.
    pub async fn next(counters: &Coll<Counter>, id: &str) -> Result<u32> {
        let update = doc! {
            "$inc": { "value": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = counters
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("counter {id}")))?;
        Ok(counter.value)
    }
}

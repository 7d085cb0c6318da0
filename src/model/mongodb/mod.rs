//! MongoDB plumbing shared by [`MongoStore`](crate::store::MongoStore).

mod collection;
mod counter;
mod errors;

pub use collection::{ensure_election_state_exists, ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{Counter, CANDIDATE_ID_COUNTER_ID};
pub use errors::{is_duplicate_key_error, is_transaction_conflict, is_transient_error};

//! DB-compatible (e.g. de/serialisable) types.
//!
//! These are the persisted entities of the engine. They are shared by every
//! [`BallotStore`](crate::store::BallotStore) implementation, so they carry no
//! storage-specific IDs.

pub mod admin;
pub mod candidate;
pub mod election_state;
pub mod voter;

pub use admin::Admin;
pub use candidate::{Candidate, NewCandidate};
pub use election_state::ElectionState;
pub use voter::Voter;

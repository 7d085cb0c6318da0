//! API-compatible types.
//!
//! The types in this module are request bodies and responses of the HTTP
//! surface. Persisted fields that callers have no business seeing, e.g.
//! password hashes and claim deadlines, are deliberately absent.

pub mod admin;
pub mod auth;
pub mod candidate;
pub mod status;
pub mod voter;

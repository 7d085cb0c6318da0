use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::{error, warn};
use rocket::{
    http::Status,
    response::{status, Responder},
    Request,
};
use thiserror::Error;

use crate::engine::{ClaimError, CommitError, SessionError};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Anything that can go wrong while handling a request.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Store(e) => store_status(e),
            Self::Claim(e) => match e {
                ClaimError::ElectionInactive => Status::Forbidden,
                ClaimError::NotFound(_) => Status::NotFound,
                ClaimError::AlreadyVoted(_) | ClaimError::AlreadyInProgress(_) => {
                    Status::Conflict
                }
                ClaimError::Store(e) => store_status(e),
            },
            Self::Session(e) => match e {
                SessionError::NoSession | SessionError::UnknownCandidate(_) => Status::NotFound,
                SessionError::SelectionLimitExceeded(_) | SessionError::EmptyBallot => {
                    Status::UnprocessableEntity
                }
                SessionError::SessionExpired => Status::Gone,
                SessionError::NotOpen(_) => Status::Conflict,
                SessionError::Commit(e) => match e {
                    CommitError::AlreadyCommitted | CommitError::NotClaimed => Status::Conflict,
                    CommitError::UnknownCandidate(_) => Status::NotFound,
                    CommitError::Transient(_) => Status::ServiceUnavailable,
                    CommitError::Fatal(_) => Status::InternalServerError,
                },
                SessionError::Store(e) => store_status(e),
            },
            Self::Jwt(e) => match e.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Status(status, _) => *status,
        }
    }
}

fn store_status(e: &StoreError) -> Status {
    match e {
        StoreError::Duplicate(_) => Status::Conflict,
        e if e.is_transient() => Status::ServiceUnavailable,
        _ => Status::InternalServerError,
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        let message = self.to_string();
        if status.code >= 500 {
            error!("{} {}: {message}", req.method(), req.uri());
        } else {
            warn!("{} {}: {message}", req.method(), req.uri());
        }
        status::Custom(status, message).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::SessionState;

    #[test]
    fn claim_errors_map_to_statuses() {
        let cases = [
            (ClaimError::ElectionInactive, Status::Forbidden),
            (ClaimError::NotFound("S1".into()), Status::NotFound),
            (ClaimError::AlreadyVoted("S1".into()), Status::Conflict),
            (ClaimError::AlreadyInProgress("S1".into()), Status::Conflict),
        ];
        for (error, status) in cases {
            assert_eq!(Error::from(error).status(), status);
        }
    }

    #[test]
    fn session_errors_map_to_statuses() {
        let cases = [
            (SessionError::SelectionLimitExceeded(2), Status::UnprocessableEntity),
            (SessionError::SessionExpired, Status::Gone),
            (SessionError::NoSession, Status::NotFound),
            (
                SessionError::NotOpen(SessionState::Committed),
                Status::Conflict,
            ),
            (
                SessionError::Commit(CommitError::Transient(StoreError::Unavailable(
                    "down".into(),
                ))),
                Status::ServiceUnavailable,
            ),
            (
                SessionError::Commit(CommitError::Fatal(StoreError::Missing(
                    "election state".into(),
                ))),
                Status::InternalServerError,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(Error::from(error).status(), status);
        }
    }

    #[test]
    fn store_errors_map_to_statuses() {
        assert_eq!(
            Error::from(StoreError::Duplicate("voter S1".into())).status(),
            Status::Conflict
        );
        assert_eq!(
            Error::from(StoreError::Unavailable("down".into())).status(),
            Status::ServiceUnavailable
        );
        assert_eq!(
            Error::from(StoreError::Missing("election state".into())).status(),
            Status::InternalServerError
        );
        assert_eq!(
            Error::not_found("Voter S1".into()).to_string(),
            "Voter S1 not found"
        );
    }
}

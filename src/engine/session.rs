use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::common::{CandidateId, VoterId};
use crate::store::StoreError;

use super::claim::SessionHandle;
use super::committer::{CommitError, CommitReceipt};
use super::SessionSettings;

/// Lifecycle of a voting session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Accepting selections while the timer runs.
    Open,
    /// Ballot handed to the committer.
    Committing,
    Committed,
    /// Timed out before a ballot was committed. The claim has been released.
    Expired,
    /// The commit failed. The claim is still held.
    Failed,
}

impl SessionState {
    /// Does a session in this state keep its voter claimed?
    pub fn holds_claim(self) -> bool {
        matches!(self, Self::Open | Self::Committing | Self::Failed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Expired => "expired",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No voting session in progress")]
    NoSession,
    #[error("At most {0} selections are allowed")]
    SelectionLimitExceeded(usize),
    #[error("The voting session has expired")]
    SessionExpired,
    #[error("No candidate with ID {0} on the ballot")]
    UnknownCandidate(CandidateId),
    #[error("Cannot submit an empty ballot")]
    EmptyBallot,
    #[error("The voting session is {0}")]
    NotOpen(SessionState),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of toggling a selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Toggled {
    Added,
    Removed,
    /// Added, and the ballot is now full. The session has moved to `Committing`.
    Filled,
}

/// Result of advancing the session timer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ticked {
    /// Still open, with this many ticks left.
    Running(u32),
    /// The last tick elapsed; the session is now `Expired`.
    Expired,
    /// The session was not open, so nothing happened.
    Idle,
}

/// Snapshot of a session, safe to hand to the voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub voter_id: VoterId,
    pub state: SessionState,
    pub selections: Vec<CandidateId>,
    pub remaining: u32,
    pub max_selections: usize,
    pub deadline: DateTime<Utc>,
    pub receipt: Option<CommitReceipt>,
}

/// The per-voter session state machine.
///
/// Time is measured in ticks: the session never reads the clock itself.
/// Storage effects of a transition (commit, claim release) are the caller's job.
#[derive(Debug)]
pub struct VotingSession {
    handle: SessionHandle,
    state: SessionState,
    selections: Vec<CandidateId>,
    ballot: BTreeSet<CandidateId>,
    max_selections: usize,
    remaining: u32,
    receipt: Option<CommitReceipt>,
    retryable: bool,
}

impl VotingSession {
    /// Open a session for a claimed voter, offering the given candidates.
    pub fn open(
        handle: SessionHandle,
        ballot: impl IntoIterator<Item = CandidateId>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            handle,
            state: SessionState::Open,
            selections: Vec::with_capacity(settings.max_selections),
            ballot: ballot.into_iter().collect(),
            max_selections: settings.max_selections,
            remaining: settings.window_ticks,
            receipt: None,
            retryable: false,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current selections, in the order they were made.
    pub fn selections(&self) -> &[CandidateId] {
        &self.selections
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Expired => Err(SessionError::SessionExpired),
            state => Err(SessionError::NotOpen(state)),
        }
    }

    /// Select the candidate, or deselect it if already selected.
    ///
    /// Filling the last free slot moves the session to `Committing`.
    /// A full ballot rejects further candidates with `SelectionLimitExceeded`
    /// even once it has moved on from `Open`.
    pub fn toggle_selection(&mut self, candidate_id: CandidateId) -> Result<Toggled, SessionError> {
        if self.state == SessionState::Expired {
            return Err(SessionError::SessionExpired);
        }
        if !self.ballot.contains(&candidate_id) {
            return Err(SessionError::UnknownCandidate(candidate_id));
        }
        let selected = self.selections.iter().position(|&id| id == candidate_id);
        if selected.is_none() && self.selections.len() >= self.max_selections {
            return Err(SessionError::SelectionLimitExceeded(self.max_selections));
        }
        self.ensure_open()?;

        if let Some(index) = selected {
            self.selections.remove(index);
            return Ok(Toggled::Removed);
        }

        self.selections.push(candidate_id);
        if self.selections.len() == self.max_selections {
            self.state = SessionState::Committing;
            Ok(Toggled::Filled)
        } else {
            Ok(Toggled::Added)
        }
    }

    /// Hand in the current selections before the ballot is full, or try
    /// again after a retryable commit failure. Moves to `Committing`.
    pub fn submit(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open if self.selections.is_empty() => Err(SessionError::EmptyBallot),
            SessionState::Open => {
                self.state = SessionState::Committing;
                Ok(())
            }
            SessionState::Failed if self.retryable => {
                self.state = SessionState::Committing;
                Ok(())
            }
            _ => self.ensure_open(),
        }
    }

    /// Record the outcome of committing this session's ballot.
    pub fn record_commit(&mut self, outcome: Result<CommitReceipt, &CommitError>) {
        debug_assert_eq!(self.state, SessionState::Committing);
        match outcome {
            Ok(receipt) => {
                self.state = SessionState::Committed;
                self.receipt = Some(receipt);
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.retryable = e.is_retryable();
            }
        }
    }

    /// Advance the timer by one tick. Only an open session counts down.
    pub fn tick(&mut self) -> Ticked {
        if self.state != SessionState::Open {
            return Ticked::Idle;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.state = SessionState::Expired;
            Ticked::Expired
        } else {
            Ticked::Running(self.remaining)
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            voter_id: self.handle.voter_id.clone(),
            state: self.state,
            selections: self.selections.clone(),
            remaining: self.remaining,
            max_selections: self.max_selections,
            deadline: self.handle.deadline,
            receipt: self.receipt.clone(),
        }
    }
}

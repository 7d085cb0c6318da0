//! The voting session and ballot commit engine.
//!
//! [`Engine`] ties together the election gate, voter claims, the per-voter
//! session state machines and their timers, ballot commits and results.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use rocket::tokio::sync::Mutex;

use crate::model::common::{CandidateId, VoterId};
use crate::store::{self, BallotStore, Transition};
use crate::ticker::Ticker;

mod claim;
mod committer;
mod gate;
mod results;
mod session;
mod sweeper;

pub use claim::{ClaimError, EligibilityClaim, SessionHandle};
pub use committer::{BallotCommitter, CommitError, CommitReceipt};
pub use gate::ElectionGate;
pub use results::{rank, ResultAggregator, ResultRow};
pub use session::{SessionError, SessionState, SessionView, Ticked, Toggled, VotingSession};
pub use sweeper::ClaimSweeper;

/// How sessions are run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Ballot size at which a session commits automatically.
    pub max_selections: usize,
    /// Session length, in ticks.
    pub window_ticks: u32,
    /// Length of one tick.
    pub tick_interval: Duration,
    /// Whether the engine drives each session's ticks itself. If not, the
    /// caller must call [`Engine::tick`] once per tick.
    pub self_ticking: bool,
}

impl SessionSettings {
    /// Wall-clock length of a session.
    pub fn window(&self) -> chrono::Duration {
        let millis = self.tick_interval.as_millis() * u128::from(self.window_ticks);
        chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_selections: 2,
            window_ticks: 60,
            tick_interval: Duration::from_secs(1),
            self_ticking: true,
        }
    }
}

/// A session and the timer driving it.
struct LiveSession {
    session: VotingSession,
    ticker: Option<Ticker>,
}

impl LiveSession {
    /// Stop the timer. Only the first call after the session leaves `Open` does anything.
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

type SessionSlot = Arc<Mutex<LiveSession>>;

/// Entry point for every voting operation.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn BallotStore>,
    gate: ElectionGate,
    claims: EligibilityClaim,
    committer: BallotCommitter,
    results: ResultAggregator,
    settings: SessionSettings,
    sessions: Arc<Mutex<HashMap<VoterId, SessionSlot>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn BallotStore>, settings: SessionSettings) -> Self {
        let gate = ElectionGate::new(store.clone());
        Self {
            claims: EligibilityClaim::new(gate.clone(), store.clone()),
            committer: BallotCommitter::new(store.clone()),
            results: ResultAggregator::new(store.clone()),
            gate,
            store,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &dyn BallotStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub async fn is_election_active(&self) -> store::Result<bool> {
        self.gate.is_active().await
    }

    pub async fn set_election_active(&self, active: bool) -> store::Result<()> {
        self.gate.set_active(active).await
    }

    /// Claim the voter and open a session for them.
    pub async fn start_session(&self, voter_id: &str) -> Result<SessionView, ClaimError> {
        // Load the ballot first, so a failure here leaves no claim behind.
        let ballot = self
            .store
            .candidates()
            .await?
            .into_iter()
            .map(|candidate| candidate.candidate_id)
            .collect::<Vec<_>>();
        let handle = self
            .claims
            .try_claim(voter_id, self.settings.window())
            .await?;

        let session = VotingSession::open(handle, ballot, &self.settings);
        let view = session.view();
        let slot = Arc::new(Mutex::new(LiveSession {
            session,
            ticker: None,
        }));
        if self.settings.self_ticking {
            let ticker = self.spawn_ticker(slot.clone());
            slot.lock().await.ticker = Some(ticker);
        }

        let previous = self
            .sessions
            .lock()
            .await
            .insert(voter_id.to_string(), slot);
        if let Some(previous) = previous {
            // Only a finished session can be replaced, but make sure its timer is gone.
            previous.lock().await.stop_ticker();
        }

        debug!("Opened session for voter {voter_id}");
        Ok(view)
    }

    /// Toggle a candidate on the voter's ballot. Filling the ballot commits it.
    pub async fn select(
        &self,
        voter_id: &str,
        candidate_id: CandidateId,
    ) -> Result<SessionView, SessionError> {
        let slot = self.slot(voter_id).await?;
        let mut live = slot.lock().await;

        let toggled = live.session.toggle_selection(candidate_id)?;
        debug!("Voter {voter_id} selection {candidate_id}: {toggled:?}");
        if toggled == Toggled::Filled {
            live.stop_ticker();
            self.commit(&mut live).await?;
        }
        Ok(live.session.view())
    }

    /// Commit the voter's ballot as it stands, or retry a failed commit.
    pub async fn submit(&self, voter_id: &str) -> Result<SessionView, SessionError> {
        let slot = self.slot(voter_id).await?;
        let mut live = slot.lock().await;

        live.session.submit()?;
        live.stop_ticker();
        self.commit(&mut live).await?;
        Ok(live.session.view())
    }

    /// Advance the voter's session timer by one tick.
    pub async fn tick(&self, voter_id: &str) -> Result<SessionView, SessionError> {
        let slot = self.slot(voter_id).await?;
        let mut live = slot.lock().await;
        self.advance(&mut live, false).await?;
        Ok(live.session.view())
    }

    /// The voter's current or most recent session.
    pub async fn session(&self, voter_id: &str) -> Result<SessionView, SessionError> {
        let slot = self.slot(voter_id).await?;
        let live = slot.lock().await;
        Ok(live.session.view())
    }

    /// Ranked results as of now.
    pub async fn results(&self) -> store::Result<Vec<ResultRow>> {
        self.results.list_results().await
    }

    /// Release claims that lapsed more than `grace` ago without their session
    /// having released them, e.g. because the process running it died.
    ///
    /// Claims held by this engine's own sessions are left alone, even past
    /// their deadline: a failed commit keeps its claim until resubmitted.
    pub async fn sweep_stale_claims(&self, grace: chrono::Duration) -> store::Result<u64> {
        let held = self.held_claims().await;
        let released = self
            .store
            .expire_stale_claims(Utc::now() - grace, &held)
            .await?;
        if released > 0 {
            warn!("Released {released} orphaned voter claim(s)");
        }
        Ok(released)
    }

    /// Voters whose claims are held by sessions of this engine.
    async fn held_claims(&self) -> Vec<VoterId> {
        let slots = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(voter_id, slot)| (voter_id.clone(), slot.clone()))
            .collect::<Vec<_>>();

        let mut held = vec![];
        for (voter_id, slot) in slots {
            let holds = match slot.try_lock() {
                Ok(live) => live.session.state().holds_claim(),
                // Busy, so mid-commit or mid-tick.
                Err(_) => true,
            };
            if holds {
                held.push(voter_id);
            }
        }
        held
    }

    async fn slot(&self, voter_id: &str) -> Result<SessionSlot, SessionError> {
        self.sessions
            .lock()
            .await
            .get(voter_id)
            .cloned()
            .ok_or(SessionError::NoSession)
    }

    /// Commit the ballot of a session that has just moved to `Committing`.
    async fn commit(&self, live: &mut LiveSession) -> Result<(), CommitError> {
        let result = self
            .committer
            .commit(live.session.handle(), live.session.selections())
            .await;
        match result {
            Ok(receipt) => {
                live.session.record_commit(Ok(receipt));
                Ok(())
            }
            Err(e) => {
                live.session.record_commit(Err(&e));
                Err(e)
            }
        }
    }

    /// Tick the session, releasing the claim if it expires.
    ///
    /// `from_ticker` is set when running inside the session's own ticker task.
    async fn advance(
        &self,
        live: &mut LiveSession,
        from_ticker: bool,
    ) -> Result<Ticked, SessionError> {
        let ticked = live.session.tick();
        if ticked != Ticked::Expired {
            return Ok(ticked);
        }

        if let Some(ticker) = live.ticker.take() {
            if from_ticker {
                // Aborting our own task would cut the release below short.
                ticker.detach();
            } else {
                ticker.cancel();
            }
        }

        let voter_id = &live.session.handle().voter_id;
        match self.store.release_voter(voter_id).await {
            Ok(Transition::Applied) => debug!("Session for voter {voter_id} expired"),
            Ok(other) => warn!("Expired session for voter {voter_id} found the claim already gone: {other:?}"),
            Err(e) => {
                // The claim deadline has passed, so the sweeper will release it.
                error!("Failed to release claim of expired session for voter {voter_id}: {e}");
                return Err(e.into());
            }
        }
        Ok(ticked)
    }

    fn spawn_ticker(&self, slot: SessionSlot) -> Ticker {
        let engine = self.clone();
        Ticker::start(self.settings.tick_interval, move || {
            let engine = engine.clone();
            let slot = slot.clone();
            async move {
                let mut live = slot.lock().await;
                match engine.advance(&mut live, true).await {
                    Ok(Ticked::Running(_)) => ControlFlow::Continue(()),
                    _ => ControlFlow::Break(()),
                }
            }
        })
    }
}

use std::sync::Arc;

use log::info;

use crate::store::{BallotStore, Result};

/// The store-wide election active/inactive switch.
///
/// Only new claims consult the gate. Sessions that are already open run to
/// completion however the gate is toggled in the meantime.
#[derive(Clone)]
pub struct ElectionGate {
    store: Arc<dyn BallotStore>,
}

impl ElectionGate {
    pub fn new(store: Arc<dyn BallotStore>) -> Self {
        Self { store }
    }

    pub async fn is_active(&self) -> Result<bool> {
        Ok(self.store.election_state().await?.active)
    }

    /// Open or close the election. Idempotent.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.store.set_election_active(active).await?;
        info!(
            "Election {}",
            if active { "started" } else { "ended" }
        );
        Ok(())
    }
}

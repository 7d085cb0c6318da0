use std::ops::ControlFlow;
use std::time::Duration;

use log::{error, info};

use crate::ticker::Ticker;

use super::Engine;

/// Periodically releases voter claims whose sessions were lost, e.g. to a crash.
#[derive(Debug)]
pub struct ClaimSweeper {
    ticker: Ticker,
}

impl ClaimSweeper {
    /// Sweep now and then every `interval`, releasing claims that lapsed more than `grace` ago.
    pub fn start(engine: Engine, interval: Duration, grace: chrono::Duration) -> Self {
        info!("Sweeping orphaned claims every {}s", interval.as_secs());
        let ticker = Ticker::start_now(interval, move || {
            let engine = engine.clone();
            async move {
                if let Err(e) = engine.sweep_stale_claims(grace).await {
                    // Keep going: the next sweep will catch anything missed.
                    error!("Orphaned claim sweep failed: {e}");
                }
                ControlFlow::Continue(())
            }
        });
        Self { ticker }
    }

    pub fn stop(self) {
        self.ticker.cancel();
    }
}

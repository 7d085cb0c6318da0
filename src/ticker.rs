use std::future::Future;
use std::ops::ControlFlow;

use rocket::tokio::{
    self,
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};

/// A task run periodically in the background until it breaks or is cancelled.
///
/// Dropping a `Ticker` leaves the task running; use [`Ticker::cancel`] to stop it.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Run `task` every `period`, starting one period from now, until it
    /// returns [`ControlFlow::Break`].
    pub fn start<F, Fut>(period: Duration, task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        Self::start_at(Instant::now() + period, period, task)
    }

    /// Run `task` now, then every `period` after.
    pub fn start_now<F, Fut>(period: Duration, task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        Self::start_at(Instant::now(), period, task)
    }

    fn start_at<F, Fut>(first: Instant, period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(first, period);
            // A late tick must not be followed by a burst of catch-up ticks.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if task().await.is_break() {
                    break;
                }
            }
        });
        Self { handle }
    }

    /// Stop the task. It will not run again, though a run already under way
    /// is interrupted at its next suspension point.
    ///
    /// Must not be called from within the task itself; use [`Ticker::detach`] there.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Give up control of the task without stopping it, for when the task
    /// is about to end by itself.
    pub fn detach(self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    fn counting(count: &Arc<AtomicU32>, limit: u32) -> impl FnMut() -> std::future::Ready<ControlFlow<()>> {
        let count = count.clone();
        move || {
            let ticks = count.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if ticks >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        }
    }

    #[rocket::async_test]
    async fn runs_until_break() {
        let count = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::start(Duration::from_millis(5), counting(&count, 3));

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(ticker.handle.is_finished());
    }

    #[rocket::async_test]
    async fn first_run_waits_a_period() {
        let count = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::start(Duration::from_secs(60), counting(&count, 1));

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        ticker.cancel();
    }

    #[rocket::async_test]
    async fn start_now_runs_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::start_now(Duration::from_secs(60), counting(&count, 10));

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        ticker.cancel();
    }

    #[rocket::async_test]
    async fn cancel_stops_ticking() {
        let count = Arc::new(AtomicU32::new(0));
        let ticker = Ticker::start(Duration::from_millis(5), counting(&count, u32::MAX));

        time::sleep(Duration::from_millis(50)).await;
        ticker.cancel();
        time::sleep(Duration::from_millis(10)).await;
        let stopped_at = count.load(Ordering::SeqCst);
        assert!(stopped_at > 0);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }
}

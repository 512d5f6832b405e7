//! Progress ticker for long waits.
//!
//! A [`Ticker`] logs an elapsed-time heartbeat on a background task. It is
//! scoped to one operation: dropping it (or cancelling the session) stops it.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Background heartbeat for one in-flight operation.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Start logging `label` every `period` until dropped or `shutdown` flips to true.
    pub fn start(label: impl Into<String>, period: Duration, mut shutdown: watch::Receiver<bool>) -> Self {
        let label = label.into();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut interval = interval_at(started + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!(operation = %label, elapsed_secs = started.elapsed().as_secs(), "still working");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticker() {
        let (tx, rx) = watch::channel(false);
        let ticker = Ticker::start("dispatch", Duration::from_secs(15), rx);
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(ticker.is_running());

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ticker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_task() {
        let (_tx, rx) = watch::channel(false);
        let ticker = Ticker::start("poll", Duration::from_secs(1), rx);
        let handle_running = ticker.is_running();
        drop(ticker);
        assert!(handle_running);
    }
}

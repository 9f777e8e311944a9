//! Cancellable one-shot timeout.
//!
//! A timer is a spawned task racing `tokio::time::sleep` against a
//! `CancellationToken`. Expiry runs a callback (the chain driver posts a
//! command to itself); cancellation drops the callback unrun. Each timer
//! carries the generation number of the chain state that armed it so an
//! expiry that raced a cancellation can be recognised as stale.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ArmedTimer {
    /// Spawn a timer that calls `on_expiry` after `delay` unless cancelled.
    pub fn arm<F>(generation: u64, delay: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_expiry(),
            }
        });
        Self {
            generation,
            cancel,
            task,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the timer. Cancelling one that already fired is a no-op.
    pub fn cancel(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

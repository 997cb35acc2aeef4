//! Cooperative cancellation for harness waits.
//!
//! The binary flips a `watch` channel to `true` on SIGINT/SIGTERM. Every wait
//! in the harness (request in flight, settle sleep, poll interval) races that
//! channel, so an operator abort resolves within one poll interval.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Returned when a wait was cut short by an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted by operator")]
pub struct Interrupted;

/// Receiving side of the interrupt channel.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Creates a connected sender/interrupt pair.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::new(rx))
    }

    /// An interrupt that never fires.
    pub fn never() -> Self {
        let (_tx, interrupt) = Self::channel();
        interrupt
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Drives `fut` to completion unless the interrupt fires first.
    ///
    /// Dropping the future on interrupt aborts whatever it was doing.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::pin!(fut);
        loop {
            if *self.rx.borrow_and_update() {
                return Err(Interrupted);
            }
            tokio::select! {
                output = &mut fut => return Ok(output),
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can interrupt us any more.
                        return Ok(fut.await);
                    }
                }
            }
        }
    }

    /// Sleeps for `duration` unless interrupted.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        self.guard(tokio::time::sleep_until(deadline)).await
    }
}

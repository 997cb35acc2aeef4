//! Signal observation.
//!
//! After a probe is delivered the bot reacts asynchronously: it may log within
//! milliseconds or only after an upstream AI call returns many seconds later.
//! The observer polls the log tail and the document store until every expected
//! signal has shown up, a terminal signal has shown up, or the time budget runs
//! out.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::interrupt::{Interrupt, Interrupted};
use crate::log_tail::{LogCursor, LogTail};
use crate::signal::{CompiledSignal, Expectation};
use crate::store::DocumentStore;

/// Outcome of one wait.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Signals whose expectation held: presence specs that were seen and
    /// absence specs that were not.
    pub matched: BTreeSet<String>,

    /// Signals whose expectation did not hold.
    pub unmatched: BTreeSet<String>,

    /// Log lines read since the cursor, used for keyword scoring.
    pub window: Vec<String>,

    /// Reasons observation was incomplete (missing log, store errors).
    pub degraded: Vec<String>,

    pub elapsed: Duration,
}

impl Observation {
    pub fn is_matched(&self, name: &str) -> bool {
        self.matched.contains(name)
    }
}

/// Polls the log and the document store for signals.
#[derive(Clone)]
pub struct SignalObserver {
    log: LogTail,
    store: Option<Arc<dyn DocumentStore>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for SignalObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalObserver")
            .field("log", &self.log)
            .field("store", &self.store.is_some())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl SignalObserver {
    pub fn new(log: LogTail, poll_interval: Duration) -> Self {
        Self {
            log,
            store: None,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn log(&self) -> &LogTail {
        &self.log
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Captures the log position to observe from.
    pub fn cursor(&self) -> LogCursor {
        self.log.cursor()
    }

    /// Waits up to `budget` for `signals` to be observed after `cursor`.
    ///
    /// Matches are sticky: a line seen once counts even if it later scrolls out
    /// of the tail. Absence specs keep the wait open for the whole budget
    /// unless a terminal signal shows up first, so late violations are caught.
    /// The wait never exceeds `budget` plus one poll interval, and an
    /// interrupt ends it within one poll interval. Both bounds hold even when
    /// a store query hangs. Signal names are expected to be unique, as
    /// [`crate::signal::compile_all`] guarantees.
    pub async fn await_signals(
        &self,
        chat_id: i64,
        signals: &[CompiledSignal],
        cursor: &LogCursor,
        budget: Duration,
        interrupt: &mut Interrupt,
    ) -> Result<Observation, Interrupted> {
        let start = Instant::now();
        let deadline = start + budget;

        let presence_total = signals
            .iter()
            .filter(|s| s.spec().expectation == Expectation::Present)
            .count();
        let absence_total = signals.len() - presence_total;
        let needs_store = signals.iter().any(CompiledSignal::is_store);

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut window: Vec<String>;
        let mut degraded: Vec<String> = Vec::new();

        loop {
            if interrupt.is_triggered() {
                return Err(Interrupted);
            }

            let read = self.log.read_since(cursor);
            if read.missing {
                push_once(
                    &mut degraded,
                    format!("log file {} is not readable", self.log.path().display()),
                );
            }
            window = read.lines;

            let document = if needs_store {
                self.fetch_document(chat_id, deadline, interrupt, &mut degraded)
                    .await?
            } else {
                None
            };

            for signal in signals {
                if seen.contains(signal.name()) {
                    continue;
                }
                let hit = if signal.is_store() {
                    signal.matches_document(document.as_ref())
                } else {
                    window.iter().any(|line| signal.matches_line(line))
                };
                if hit {
                    debug!(
                        signal = signal.name(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "signal observed"
                    );
                    seen.insert(signal.name().to_string());
                }
            }

            let seen_with = |expectation: Expectation| {
                signals
                    .iter()
                    .filter(|s| s.spec().expectation == expectation && seen.contains(s.name()))
                    .count()
            };
            let terminal_hit = signals.iter().any(|s| {
                s.spec().terminal
                    && s.spec().expectation == Expectation::Present
                    && seen.contains(s.name())
            });

            // Nothing left that could change the outcome.
            let settled = seen_with(Expectation::Present) == presence_total
                && seen_with(Expectation::Absent) == absence_total;
            if settled || terminal_hit {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            interrupt
                .sleep(self.poll_interval.min(deadline - now))
                .await?;
        }

        let mut observation = Observation {
            window,
            degraded,
            elapsed: start.elapsed(),
            ..Observation::default()
        };
        for signal in signals {
            let seen = seen.contains(signal.name());
            let held = match signal.spec().expectation {
                Expectation::Present => seen,
                Expectation::Absent => !seen,
            };
            let bucket = if held {
                &mut observation.matched
            } else {
                &mut observation.unmatched
            };
            bucket.insert(signal.name().to_string());
        }

        debug!(
            matched = observation.matched.len(),
            unmatched = observation.unmatched.len(),
            elapsed_ms = observation.elapsed.as_millis() as u64,
            "observation finished"
        );
        Ok(observation)
    }

    async fn fetch_document(
        &self,
        chat_id: i64,
        deadline: Instant,
        interrupt: &mut Interrupt,
        degraded: &mut Vec<String>,
    ) -> Result<Option<Value>, Interrupted> {
        let Some(store) = &self.store else {
            push_once(degraded, "document store unavailable".to_string());
            return Ok(None);
        };
        let limit = deadline.saturating_duration_since(Instant::now()) + self.poll_interval;
        let query = tokio::time::timeout(limit, store.find_user(chat_id));
        match interrupt.guard(query).await? {
            Ok(Ok(doc)) => Ok(doc),
            Ok(Err(e)) => {
                warn!(chat_id, error = %e, "store query failed during observation");
                push_once(degraded, format!("store query failed: {e}"));
                Ok(None)
            }
            Err(_) => {
                warn!(
                    chat_id,
                    limit_ms = limit.as_millis() as u64,
                    "store query timed out during observation"
                );
                push_once(degraded, "store query outlasted the observation budget".to_string());
                Ok(None)
            }
        }
    }
}

fn push_once(list: &mut Vec<String>, message: String) {
    if !list.contains(&message) {
        list.push(message);
    }
}

//! Identifier generation for probe payloads.
//!
//! The bot under test deduplicates updates by `update_id` and tracks replies by
//! `message_id`, so every probe sent in one process must carry fresh values.
//! Ids are seeded from the wall clock (unix seconds plus a random spread) and
//! then forced strictly above a high-water mark, which makes them unique even
//! when many probes are built within the same second.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use rand::Rng;

/// Random spread added to the clock seed for message ids.
const MESSAGE_ID_SPREAD: i64 = 1_000;

/// Random spread added to the clock seed for update ids.
const UPDATE_ID_SPREAD: i64 = 10_000;

static SHARED: LazyLock<Arc<IdGenerator>> = LazyLock::new(|| Arc::new(IdGenerator::new()));

/// Thread-safe generator of process-unique probe identifiers.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last_message_id: AtomicI64,
    last_update_id: AtomicI64,
    callback_seq: AtomicU64,
}

impl IdGenerator {
    /// Creates an independent generator.
    ///
    /// Probes built from different generators are not guaranteed to have
    /// distinct ids; use [`IdGenerator::shared`] unless a test needs isolation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the generator shared by every builder in this process.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Next unique `message_id`.
    pub fn next_message_id(&self) -> i64 {
        Self::advance(&self.last_message_id, MESSAGE_ID_SPREAD)
    }

    /// Next unique `update_id`.
    pub fn next_update_id(&self) -> i64 {
        Self::advance(&self.last_update_id, UPDATE_ID_SPREAD)
    }

    /// Next unique callback query id (`<millis>_<seq>_<hex>`).
    pub fn next_callback_id(&self) -> String {
        let seq = self.callback_seq.fetch_add(1, Ordering::Relaxed);
        let suffix: u16 = rand::thread_rng().r#gen();
        format!("{}_{}_{:04x}", Utc::now().timestamp_millis(), seq, suffix)
    }

    fn advance(last: &AtomicI64, spread: i64) -> i64 {
        let seed = Utc::now().timestamp() + rand::thread_rng().gen_range(0..spread);
        let mut current = last.load(Ordering::Relaxed);
        loop {
            let next = seed.max(current + 1);
            match last.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

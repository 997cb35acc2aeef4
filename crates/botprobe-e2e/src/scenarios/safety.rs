//! Database safety: first contact from new users must never drop data or the
//! index the bot looks users up by.

use std::time::Duration;

use botprobe_telegram::UserIdentity;
use chrono::Utc;

use super::ScenarioDefinition;
use crate::config::HarnessConfig;
use crate::scenario::{CountTarget, Invariant, Scenario, Step};

const NEW_USERS: i64 = 3;

/// Field the bot keys user documents by.
const USER_KEY: &str = "chatId";

pub struct DatabaseSafetyScenario {
    id: String,
    description: String,
    tier: String,
}

impl DatabaseSafetyScenario {
    pub fn new() -> Self {
        Self {
            id: "database-safety".to_string(),
            description: "Messages from new users never shrink users, collections or the chatId index".to_string(),
            tier: "Infrastructure".to_string(),
        }
    }
}

impl Default for DatabaseSafetyScenario {
    fn default() -> Self {
        Self::new()
    }
}

/// Identities that cannot collide with real users or with earlier runs.
fn fresh_users(seed: i64) -> Vec<UserIdentity> {
    let base = 7_000_000_000 + (seed % 100_000_000) * 10;
    (1..=NEW_USERS)
        .map(|n| {
            UserIdentity::new(
                base + n,
                format!("probe_safety_{n}"),
                format!("SafetyProbe{n}"),
            )
        })
        .collect()
}

impl ScenarioDefinition for DatabaseSafetyScenario {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tier(&self) -> &str {
        &self.tier
    }

    fn build(&self, config: &HarnessConfig) -> Scenario {
        let mut scenario = Scenario::new(&self.id, &self.description)
            .invariant(Invariant::MonotonicCount(CountTarget::Documents(
                config.store.users_collection.clone(),
            )))
            .invariant(Invariant::MonotonicCount(CountTarget::Collections))
            .invariant(Invariant::index_present(
                config.store.users_collection.clone(),
                USER_KEY,
            ));

        for (index, user) in fresh_users(Utc::now().timestamp()).into_iter().enumerate() {
            let n = index + 1;
            scenario = scenario.step(
                Step::text(
                    format!("new-user-{n}"),
                    format!("Test database safety message {n}"),
                )
                .as_user(user)
                .settle(Duration::from_secs(2))
                .budget(Duration::ZERO),
            );
        }
        scenario
    }
}

//! Context reset: after `/reset` is confirmed, stored memory must not leak
//! into answers.

use std::time::Duration;

use super::{MEMORY_RETRIEVED, ScenarioDefinition, context_used, memory_retrieved};
use crate::config::HarnessConfig;
use crate::scenario::{Fixture, Scenario, Step};
use crate::signal::{FieldPredicate, SignalSpec};

/// Field on the user document written when a reset is confirmed.
const RESET_FIELD: &str = "lastContextReset";

pub struct ResetContextScenario {
    id: String,
    description: String,
    tier: String,
}

impl ResetContextScenario {
    pub fn new() -> Self {
        Self {
            id: "reset-context".to_string(),
            description: "Confirmed /reset detaches conversation memory".to_string(),
            tier: "Memory".to_string(),
        }
    }
}

impl Default for ResetContextScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioDefinition for ResetContextScenario {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tier(&self) -> &str {
        &self.tier
    }

    fn build(&self, _config: &HarnessConfig) -> Scenario {
        Scenario::new(&self.id, &self.description)
            .fixture(Fixture::ClearField {
                field: RESET_FIELD.to_string(),
            })
            .step(
                Step::text(
                    "introduce",
                    "My name is Alex and I work as a software developer in London. \
                     Please remember this information.",
                )
                .budget(Duration::from_secs(20))
                .expect(memory_retrieved().advisory())
                .expect(context_used().advisory()),
            )
            .step(
                Step::text("recall-before", "What is my profession and where do I work?")
                    .budget(Duration::from_secs(20))
                    .expect(memory_retrieved().advisory()),
            )
            .step(Step::text("reset", "/reset").fail_fast())
            .step(
                Step::callback("confirm", "reset_yes")
                    .budget(Duration::from_secs(15))
                    .expect(SignalSpec::store_field(
                        "reset recorded",
                        RESET_FIELD,
                        FieldPredicate::NonNull,
                    ))
                    .fail_fast(),
            )
            .step(
                Step::text(
                    "recall-after",
                    "What do you know about me? What is my profession?",
                )
                .settle(Duration::from_secs(5))
                .budget(Duration::from_secs(20))
                .expect(SignalSpec::regex(
                    "context reset",
                    "context reset at|skipping conversation memory",
                ))
                .expect(
                    SignalSpec::contains(MEMORY_RETRIEVED, "Retrieved conversation memory")
                        .absent()
                        .critical(),
                ),
            )
    }
}

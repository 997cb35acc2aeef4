//! End-to-end smoke test of the message pipeline for a single probe.

use std::time::Duration;

use super::{ScenarioDefinition, context_used, memory_retrieved};
use crate::config::HarnessConfig;
use crate::scenario::{Fixture, Scenario, Step};
use crate::signal::SignalSpec;

pub struct WebhookSmokeScenario {
    id: String,
    description: String,
    tier: String,
}

impl WebhookSmokeScenario {
    pub fn new() -> Self {
        Self {
            id: "webhook-smoke".to_string(),
            description: "One message travels webhook, AI call and queue without errors"
                .to_string(),
            tier: "Infrastructure".to_string(),
        }
    }
}

impl Default for WebhookSmokeScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioDefinition for WebhookSmokeScenario {
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
            .fixture(Fixture::Inspect {
                field: "currentAI".to_string(),
            })
            .step(
                Step::text("hello", "Hello! How are you today?")
                    .settle(Duration::from_secs(1))
                    .budget(Duration::from_secs(60))
                    .expect(SignalSpec::contains("message received", "\"message_id\":{message_id}"))
                    .expect(SignalSpec::contains("ai request", "AI SDK request"))
                    .expect(SignalSpec::contains("ai response", "AI SDK response received"))
                    .expect(
                        SignalSpec::regex(
                            "queue resolved",
                            r"Queue message id {message_id} was resolved",
                        )
                        .terminal(),
                    )
                    .expect(memory_retrieved().advisory())
                    .expect(context_used().advisory())
                    .expect(SignalSpec::level("error logged", "error").absent().critical()),
            )
    }
}

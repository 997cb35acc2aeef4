//! Built-in scenarios.
//!
//! Each scenario is a small struct implementing [`ScenarioDefinition`]. It
//! carries only its identity; the concrete steps are built from the loaded
//! configuration so that user identity, collection names and similar values
//! never need to be hardcoded.
//!
//! # Catalog
//!
//! | id | tier |
//! |----|------|
//! | `conversation-consistency` | Memory |
//! | `reset-context` | Memory |
//! | `message-format` | Commands |
//! | `reply-format` | Commands |
//! | `webhook-smoke` | Infrastructure |
//! | `database-safety` | Infrastructure |

mod conversation;
mod formatting;
mod reset;
mod safety;
mod smoke;

pub use conversation::ConversationConsistencyScenario;
pub use formatting::{MessageFormatScenario, ReplyFormatScenario};
pub use reset::ResetContextScenario;
pub use safety::DatabaseSafetyScenario;
pub use smoke::WebhookSmokeScenario;

use crate::config::HarnessConfig;
use crate::scenario::Scenario;
use crate::signal::SignalSpec;

/// A named, buildable scenario.
pub trait ScenarioDefinition: Send + Sync {
    /// Stable identifier used on the command line.
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Grouping shown by `botprobe list`.
    fn tier(&self) -> &str;

    /// Builds the concrete scenario for `config`.
    fn build(&self, config: &HarnessConfig) -> Scenario;
}

/// Every built-in scenario, in catalog order.
pub fn all() -> Vec<Box<dyn ScenarioDefinition>> {
    vec![
        Box::new(ConversationConsistencyScenario::new()),
        Box::new(ResetContextScenario::new()),
        Box::new(MessageFormatScenario::new()),
        Box::new(ReplyFormatScenario::new()),
        Box::new(WebhookSmokeScenario::new()),
        Box::new(DatabaseSafetyScenario::new()),
    ]
}

/// Looks up a built-in scenario by id.
pub fn find(id: &str) -> Option<Box<dyn ScenarioDefinition>> {
    all().into_iter().find(|s| s.id() == id)
}

pub(crate) const MEMORY_RETRIEVED: &str = "memory retrieved";
pub(crate) const CONTEXT_USED: &str = "context used";

/// The bot loaded stored conversation memory for the user.
pub(crate) fn memory_retrieved() -> SignalSpec {
    SignalSpec::contains(MEMORY_RETRIEVED, "Retrieved conversation memory")
}

/// The bot built its prompt with user context.
pub(crate) fn context_used() -> SignalSpec {
    SignalSpec::contains(CONTEXT_USED, "Using context for user")
}

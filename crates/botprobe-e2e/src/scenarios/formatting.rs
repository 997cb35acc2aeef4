//! Message drafting (`/m`) and reply drafting (`/r`) commands with their
//! format buttons.

use std::time::Duration;

use super::ScenarioDefinition;
use crate::config::HarnessConfig;
use crate::scenario::{ReplyTarget, Scenario, Step};
use crate::signal::SignalSpec;

const DRAFT_BUTTONS: &[&str] = &[
    "format_team_chat",
    "format_formal_business",
    "format_quick_update",
    "translate_ru",
    "translate_de",
    "format_keep_original",
];

const REPLY_BUTTONS: &[&str] = &[
    "reply_format_formal_business",
    "reply_format_team_chat",
    "reply_format_personal",
    "reply_format_technical",
    "reply_format_apology",
    "reply_keep_original",
];

/// `/m` turns notes into a draft; each format button reworks the cached draft.
pub struct MessageFormatScenario {
    id: String,
    description: String,
    tier: String,
}

impl MessageFormatScenario {
    pub fn new() -> Self {
        Self {
            id: "message-format".to_string(),
            description: "/m drafts a message and format buttons rework the cached draft"
                .to_string(),
            tier: "Commands".to_string(),
        }
    }
}

impl Default for MessageFormatScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioDefinition for MessageFormatScenario {
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
        let mut scenario = Scenario::new(&self.id, &self.description).step(
            Step::text("draft", "/m Привет. Буду отсутствовать на занятиях завтра")
                .budget(Duration::from_secs(15))
                .expect(SignalSpec::contains(
                    "command detected",
                    "Create message by notes command is detected",
                ))
                .expect(SignalSpec::contains("draft cached", "Email draft cached for user").advisory())
                .fail_fast(),
        );

        for button in DRAFT_BUTTONS {
            let outcome = match button.strip_prefix("format_") {
                Some(format) => SignalSpec::contains(
                    "reformatted",
                    format!("Message reformatted as {format}"),
                ),
                None => SignalSpec::contains("translated", "Message translated to"),
            };
            scenario = scenario.step(
                Step::callback(*button, *button)
                    .budget(Duration::from_secs(15))
                    .expect(SignalSpec::contains(
                        "draft retrieved",
                        "Email draft retrieved for user",
                    ))
                    .expect(outcome.advisory()),
            );
        }
        scenario
    }
}

/// `/r` drafts a reply, optionally to a quoted message; buttons pick a tone.
pub struct ReplyFormatScenario {
    id: String,
    description: String,
    tier: String,
}

impl ReplyFormatScenario {
    pub fn new() -> Self {
        Self {
            id: "reply-format".to_string(),
            description: "/r accepts reply prompts and reply-format buttons".to_string(),
            tier: "Commands".to_string(),
        }
    }
}

impl Default for ReplyFormatScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioDefinition for ReplyFormatScenario {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tier(&self) -> &str {
        &self.tier
    }

    // Delivery only: these commands log nothing distinctive.
    fn build(&self, _config: &HarnessConfig) -> Scenario {
        let quick = |step: Step| step.settle(Duration::from_secs(1)).budget(Duration::ZERO);

        let mut scenario = Scenario::new(&self.id, &self.description)
            .step(quick(Step::text(
                "reply-simple",
                "/r Thank you for your message, I will get back to you soon",
            )))
            .step(quick(Step::text("bug-report", "Can you fix this bug?")))
            .step(quick(
                Step::text(
                    "reply-with-context",
                    "/r I appreciate your feedback and will implement the changes",
                )
                .replying_to(ReplyTarget::Step("bug-report".to_string())),
            ))
            .step(quick(Step::text(
                "reply-apology",
                "/r Sorry for the delay in response",
            )));

        for button in REPLY_BUTTONS {
            scenario = scenario.step(quick(Step::callback(*button, *button)));
        }
        scenario
    }
}

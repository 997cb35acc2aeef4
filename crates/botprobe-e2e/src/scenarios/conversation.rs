//! Conversation memory across a long, mixed-language exchange.

use std::time::Duration;

use super::{ScenarioDefinition, context_used, memory_retrieved};
use crate::config::HarnessConfig;
use crate::scenario::{Scenario, Step};

/// A question and the words a context-aware answer should draw on.
///
/// Keywords are listed in both languages; only one form is expected to show
/// up, so the keyword rate for this scenario stays well below 100% even for a
/// perfect bot.
const QUESTIONS: &[(&str, &[&str])] = &[
    (
        "My name is Alex and I work as a software developer in London. What's your name?",
        &[],
    ),
    (
        "В каком городе я сказал, что работаю?",
        &["london", "лондон", "work", "работ"],
    ),
    (
        "What's my job?",
        &["software", "developer", "разработчик"],
    ),
    (
        "Я планирую посетить Париж в следующем месяце. Есть рекомендации?",
        &["alex", "алекс"],
    ),
    (
        "Should I bring warm clothes for my trip?",
        &["paris", "париж", "trip", "поездк"],
    ),
    (
        "Кстати, я люблю итальянскую еду. Какой хороший ресторан в городе, где я работаю?",
        &["london", "лондон", "italian", "итальянск"],
    ),
    (
        "I have a meeting tomorrow at 2 PM. What time is it now in my work city?",
        &["london", "лондон", "meeting", "встреч"],
    ),
    (
        "Для моей профессии, какой язык программирования ты бы рекомендовал изучить?",
        &["software developer", "разработчик", "programming", "программирован"],
    ),
    (
        "Can you remind me what European city I'm planning to visit?",
        &["paris", "париж", "visit", "посет"],
    ),
    (
        "Резюме: Расскажи мне всё, что ты помнишь обо мне.",
        &[
            "alex",
            "алекс",
            "software developer",
            "разработчик",
            "london",
            "лондон",
            "paris",
            "париж",
        ],
    ),
];

/// Ten sequential questions; from the second on, the bot must load memory and
/// use context.
pub struct ConversationConsistencyScenario {
    id: String,
    description: String,
    tier: String,
}

impl ConversationConsistencyScenario {
    pub fn new() -> Self {
        Self {
            id: "conversation-consistency".to_string(),
            description: "Bot keeps conversation memory across ten mixed-language questions"
                .to_string(),
            tier: "Memory".to_string(),
        }
    }
}

impl Default for ConversationConsistencyScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioDefinition for ConversationConsistencyScenario {
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
        let mut scenario = Scenario::new(&self.id, &self.description);
        for (index, (question, keywords)) in QUESTIONS.iter().enumerate() {
            let mut step = Step::text(format!("q{}", index + 1), *question)
                .settle(Duration::from_secs(2))
                .budget(Duration::from_secs(25));
            // The first message establishes context; there is nothing to recall yet.
            if index > 0 {
                step = step
                    .expect(context_used())
                    .expect(memory_retrieved())
                    .keywords(keywords.iter().copied());
            }
            scenario = scenario.step(step);
        }
        scenario
    }
}

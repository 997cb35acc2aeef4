//! Scenario model.
//!
//! A scenario is an ordered list of steps run against one bot. Each step sends
//! one probe and states what should happen in response. Steps can refer to the
//! messages of earlier steps by label, which is how reply chains and button
//! presses under earlier messages are expressed.

use std::collections::HashMap;
use std::time::Duration;

use botprobe_telegram::{ReplyReference, UserIdentity};
use serde::Serialize;

use crate::signal::SignalSpec;

/// Default wait between sending a probe and starting to observe.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);
/// Default observation budget per step.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(20);

/// Which message a text probe replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTarget {
    /// The message of the step immediately before.
    Previous,
    /// The message of the step with this label.
    Step(String),
    /// A message known up front.
    Fixed(ReplyReference),
}

/// What a step sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    Text {
        text: String,
        reply_to: Option<ReplyTarget>,
    },
    Callback {
        data: String,
        /// Label of the step whose message carries the button.
        origin: Option<String>,
    },
}

impl ProbeSpec {
    pub fn describe(&self) -> String {
        match self {
            ProbeSpec::Text { text, .. } => format!("text {text:?}"),
            ProbeSpec::Callback { data, .. } => format!("callback {data:?}"),
        }
    }
}

/// One probe and its expectations.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub label: String,
    pub probe: ProbeSpec,

    /// Sender override for multi-user flows.
    pub identity: Option<UserIdentity>,

    #[serde(with = "duration_serde")]
    pub settle: Duration,

    #[serde(with = "duration_serde")]
    pub budget: Duration,

    pub signals: Vec<SignalSpec>,

    /// Words expected in the bot's log output for this step, matched
    /// case-insensitively.
    pub keywords: Vec<String>,

    /// A delivery failure or a missed required signal skips the rest.
    pub fail_fast: bool,
}

impl Step {
    fn new(label: impl Into<String>, probe: ProbeSpec) -> Self {
        Self {
            label: label.into(),
            probe,
            identity: None,
            settle: DEFAULT_SETTLE,
            budget: DEFAULT_BUDGET,
            signals: Vec::new(),
            keywords: Vec::new(),
            fail_fast: false,
        }
    }

    pub fn text(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            label,
            ProbeSpec::Text {
                text: text.into(),
                reply_to: None,
            },
        )
    }

    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(
            label,
            ProbeSpec::Callback {
                data: data.into(),
                origin: None,
            },
        )
    }

    /// Makes a text probe reply to `target`. No effect on callbacks.
    pub fn replying_to(mut self, target: ReplyTarget) -> Self {
        if let ProbeSpec::Text { reply_to, .. } = &mut self.probe {
            *reply_to = Some(target);
        }
        self
    }

    /// Attributes a callback's button to the message of step `label`.
    pub fn from_origin(mut self, label: impl Into<String>) -> Self {
        if let ProbeSpec::Callback { origin, .. } = &mut self.probe {
            *origin = Some(label.into());
        }
        self
    }

    pub fn as_user(mut self, identity: UserIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn expect(mut self, signal: SignalSpec) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    pub fn has_required_signals(&self) -> bool {
        self.signals.iter().any(SignalSpec::is_required)
    }
}

/// Store setup performed before the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fixture {
    /// Sets a field of the configured user's document to null.
    ClearField { field: String },
    /// Logs the current value of a field of the configured user's document.
    Inspect { field: String },
}

/// A store count that is tracked across steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum CountTarget {
    Documents(String),
    Collections,
}

impl std::fmt::Display for CountTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CountTarget::Documents(collection) => write!(f, "{collection} documents"),
            CountTarget::Collections => f.write_str("collections"),
        }
    }
}

/// Property of the store that must hold after every step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    /// The count must never decrease.
    MonotonicCount(CountTarget),
    /// `collection` must keep an index covering `field`.
    IndexPresent { collection: String, field: String },
}

impl Invariant {
    pub fn index_present(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Invariant::IndexPresent {
            collection: collection.into(),
            field: field.into(),
        }
    }
}

/// An ordered, named list of steps.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub id: String,
    pub description: String,
    pub steps: Vec<Step>,
    pub fixtures: Vec<Fixture>,
    pub invariants: Vec<Invariant>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            steps: Vec::new(),
            fixtures: Vec::new(),
            invariants: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn fixture(mut self, fixture: Fixture) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn invariant(mut self, invariant: Invariant) -> Self {
        self.invariants.push(invariant);
        self
    }
}

/// Messages sent so far in a run, keyed by step label.
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
    by_label: HashMap<String, ReplyReference>,
    last: Option<ReplyReference>,
}

impl ScenarioContext {
    pub fn record(&mut self, label: &str, message_id: i64, text: Option<String>) {
        let reference = ReplyReference { message_id, text };
        self.by_label.insert(label.to_string(), reference.clone());
        self.last = Some(reference);
    }

    pub fn get(&self, label: &str) -> Option<&ReplyReference> {
        self.by_label.get(label)
    }

    pub fn last(&self) -> Option<&ReplyReference> {
        self.last.as_ref()
    }

    /// Resolves a reply target. `None` when the referenced step never sent.
    pub fn resolve(&self, target: &ReplyTarget) -> Option<ReplyReference> {
        match target {
            ReplyTarget::Previous => self.last.clone(),
            ReplyTarget::Step(label) => self.by_label.get(label).cloned(),
            ReplyTarget::Fixed(reference) => Some(reference.clone()),
        }
    }
}

/// Serializes durations as fractional seconds.
pub(crate) mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }
}

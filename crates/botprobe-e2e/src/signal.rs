//! Signal specifications.
//!
//! A signal is a piece of observable evidence that the bot did something in
//! response to a probe: a log line, a structured log entry at some level, or a
//! field on the probed user's document. Specs are written once per scenario
//! step and compiled against the concrete probe right before observation, so
//! patterns can mention the probe's own ids.

use std::collections::HashSet;
use std::fmt;

use botprobe_telegram::ProbePayload;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether the signal must be seen or must not be seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Present,
    Absent,
}

/// How an unmatched signal affects the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Counts towards the signal rate.
    Required,
    /// Reported as a warning only.
    Advisory,
}

/// Condition on a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPredicate {
    NonNull,
    IsNull,
    Equals(Value),
}

impl FieldPredicate {
    /// Evaluates the predicate against a user document.
    ///
    /// `field` is a dotted path. A missing field reads as null; a missing
    /// document satisfies nothing.
    pub fn evaluate(&self, document: Option<&Value>, field: &str) -> bool {
        let Some(document) = document else {
            return false;
        };
        let value = lookup_path(document, field).unwrap_or(&Value::Null);
        match self {
            FieldPredicate::NonNull => !value.is_null(),
            FieldPredicate::IsNull => value.is_null(),
            FieldPredicate::Equals(expected) => value == expected,
        }
    }
}

fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// What to look for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMatcher {
    /// Case-sensitive literal substring of a log line.
    Contains(String),
    /// Regular expression against a log line.
    Regex(String),
    /// Structured log line whose `level` equals the given level.
    Level(String),
    /// Field of the probed user's document.
    StoreField {
        field: String,
        predicate: FieldPredicate,
    },
}

/// A named expectation about one observable effect of a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
    pub name: String,
    pub matcher: SignalMatcher,
    pub expectation: Expectation,
    pub requirement: Requirement,

    /// A violation fails the run regardless of the aggregate rates.
    #[serde(default)]
    pub critical: bool,

    /// Matching this signal ends the wait early.
    #[serde(default)]
    pub terminal: bool,
}

impl SignalSpec {
    fn new(name: impl Into<String>, matcher: SignalMatcher) -> Self {
        Self {
            name: name.into(),
            matcher,
            expectation: Expectation::Present,
            requirement: Requirement::Required,
            critical: false,
            terminal: false,
        }
    }

    /// A log line containing `text`.
    pub fn contains(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, SignalMatcher::Contains(text.into()))
    }

    /// A log line matching `pattern`.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(name, SignalMatcher::Regex(pattern.into()))
    }

    /// A structured log line at `level`.
    pub fn level(name: impl Into<String>, level: impl Into<String>) -> Self {
        Self::new(name, SignalMatcher::Level(level.into()))
    }

    /// A field of the probed user's document.
    pub fn store_field(
        name: impl Into<String>,
        field: impl Into<String>,
        predicate: FieldPredicate,
    ) -> Self {
        Self::new(
            name,
            SignalMatcher::StoreField {
                field: field.into(),
                predicate,
            },
        )
    }

    #[must_use]
    pub fn absent(mut self) -> Self {
        self.expectation = Expectation::Absent;
        self
    }

    #[must_use]
    pub fn advisory(mut self) -> Self {
        self.requirement = Requirement::Advisory;
        self
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.requirement == Requirement::Required
    }

    /// Renders placeholders and compiles regular expressions.
    pub fn compile(&self, ctx: &ProbeContext) -> Result<CompiledSignal, SignalError> {
        let matcher = match &self.matcher {
            SignalMatcher::Contains(text) => CompiledMatcher::Contains(ctx.render(text, false)),
            SignalMatcher::Regex(pattern) => {
                let rendered = ctx.render(pattern, true);
                let regex = Regex::new(&rendered).map_err(|source| SignalError::InvalidPattern {
                    name: self.name.clone(),
                    pattern: rendered,
                    source,
                })?;
                CompiledMatcher::Regex(regex)
            }
            SignalMatcher::Level(level) => CompiledMatcher::Level(level.to_ascii_lowercase()),
            SignalMatcher::StoreField { field, predicate } => CompiledMatcher::StoreField {
                field: field.clone(),
                predicate: predicate.clone(),
            },
        };

        Ok(CompiledSignal {
            spec: self.clone(),
            matcher,
        })
    }
}

/// Compiles every spec of a step against one probe.
///
/// Signal names identify outcomes in observations and reports, so a name may
/// appear only once per step.
pub fn compile_all(
    specs: &[SignalSpec],
    ctx: &ProbeContext,
) -> Result<Vec<CompiledSignal>, SignalError> {
    let mut names = HashSet::with_capacity(specs.len());
    specs
        .iter()
        .map(|spec| {
            if !names.insert(spec.name.as_str()) {
                return Err(SignalError::DuplicateName(spec.name.clone()));
            }
            spec.compile(ctx)
        })
        .collect()
}

/// Identifiers of the probe a signal is observed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeContext {
    pub message_id: i64,
    pub update_id: i64,
    pub chat_id: i64,
}

impl ProbeContext {
    pub fn from_payload(payload: &ProbePayload) -> Self {
        Self {
            message_id: payload.message_id(),
            update_id: payload.update_id(),
            chat_id: payload.chat_id(),
        }
    }

    /// Substitutes `{message_id}`, `{update_id}` and `{chat_id}`.
    fn render(&self, template: &str, escape: bool) -> String {
        let value = |n: i64| {
            let s = n.to_string();
            if escape { regex::escape(&s) } else { s }
        };
        template
            .replace("{message_id}", &value(self.message_id))
            .replace("{update_id}", &value(self.update_id))
            .replace("{chat_id}", &value(self.chat_id))
    }
}

#[derive(Debug, Clone)]
enum CompiledMatcher {
    Contains(String),
    Regex(Regex),
    Level(String),
    StoreField {
        field: String,
        predicate: FieldPredicate,
    },
}

/// A spec bound to one probe, ready to be evaluated.
#[derive(Debug, Clone)]
pub struct CompiledSignal {
    spec: SignalSpec,
    matcher: CompiledMatcher,
}

impl CompiledSignal {
    pub fn spec(&self) -> &SignalSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// True for matchers evaluated against the user document.
    pub fn is_store(&self) -> bool {
        matches!(self.matcher, CompiledMatcher::StoreField { .. })
    }

    /// Tests one log line. Store matchers never match lines.
    pub fn matches_line(&self, line: &str) -> bool {
        match &self.matcher {
            CompiledMatcher::Contains(text) => line.contains(text.as_str()),
            CompiledMatcher::Regex(regex) => regex.is_match(line),
            CompiledMatcher::Level(level) => line_level(line).is_some_and(|l| l == *level),
            CompiledMatcher::StoreField { .. } => false,
        }
    }

    /// Tests the user document. Log matchers never match documents.
    pub fn matches_document(&self, document: Option<&Value>) -> bool {
        match &self.matcher {
            CompiledMatcher::StoreField { field, predicate } => predicate.evaluate(document, field),
            _ => false,
        }
    }
}

impl fmt::Display for CompiledSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec.name)
    }
}

/// Extracts the level of a structured log line, lowercased.
///
/// Lines may carry a non-JSON prefix (timestamps added by a log driver); the
/// object is parsed from the first `{`. Numeric pino levels are mapped to
/// their names.
fn line_level(line: &str) -> Option<String> {
    let start = line.find('{')?;
    let value: Value = serde_json::from_str(line[start..].trim_end()).ok()?;
    match value.get("level")? {
        Value::String(s) => Some(s.to_ascii_lowercase()),
        Value::Number(n) => {
            let name = match n.as_u64()? {
                10 => "trace",
                20 => "debug",
                30 => "info",
                40 => "warn",
                50 => "error",
                60 => "fatal",
                _ => return None,
            };
            Some(name.to_string())
        }
        _ => None,
    }
}

/// Errors from compiling signal specs.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal '{name}' has an invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("signal name '{0}' is used more than once in the same step")]
    DuplicateName(String),
}

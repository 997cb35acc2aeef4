//! Sequential scenario execution.
//!
//! The runner walks a scenario one step at a time: build the probe, remember
//! where the log ends, deliver, let the bot settle, then watch for signals.
//! Everything a step produces ends up in an immutable [`StepResult`]; judging
//! those results is left to [`crate::report`].

use std::sync::Arc;
use std::time::Duration;

use botprobe_telegram::{PayloadBuilder, PayloadError, ProbePayload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, TimingConfig};
use crate::interrupt::{Interrupt, Interrupted};
use crate::log_tail::LogTail;
use crate::observer::{Observation, SignalObserver};
use crate::scenario::{
    CountTarget, Fixture, Invariant, ProbeSpec, Scenario, ScenarioContext, Step, duration_serde,
};
use crate::signal::{Expectation, ProbeContext, Requirement, SignalError, compile_all};
use crate::store::{DocumentStore, MongoShellStore, StoreError};
use crate::transport::{TransportError, WebhookClient};

/// How one signal fared in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalOutcome {
    pub name: String,
    pub requirement: Requirement,
    pub expectation: Expectation,
    pub critical: bool,
    pub matched: bool,
}

/// Everything observed for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub label: String,

    /// What was (or would have been) sent, e.g. `text "/reset"`.
    pub description: String,

    /// True when the webhook accepted the probe with HTTP 200.
    pub sent: bool,

    /// Why the step never ran, if it did not.
    pub skipped: Option<String>,

    pub status: Option<u16>,

    #[serde(with = "duration_serde")]
    pub latency: Duration,

    pub transport_error: Option<String>,

    pub signals: Vec<SignalOutcome>,

    /// Keywords the step expected.
    pub keywords: Vec<String>,

    /// Expected keywords found in the observed log window.
    pub matched_keywords: Vec<String>,

    pub critical_failures: Vec<String>,

    pub warnings: Vec<String>,

    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    fn pending(step: &Step) -> Self {
        Self {
            label: step.label.clone(),
            description: step.probe.describe(),
            sent: false,
            skipped: None,
            status: None,
            latency: Duration::ZERO,
            transport_error: None,
            signals: step
                .signals
                .iter()
                .map(|spec| SignalOutcome {
                    name: spec.name.clone(),
                    requirement: spec.requirement,
                    expectation: spec.expectation,
                    critical: spec.critical,
                    matched: false,
                })
                .collect(),
            keywords: step.keywords.clone(),
            matched_keywords: Vec::new(),
            critical_failures: Vec::new(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    fn skipped(step: &Step, reason: &str) -> Self {
        let mut result = Self::pending(step);
        result.skipped = Some(reason.to_string());
        result
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn has_required_signals(&self) -> bool {
        self.signals
            .iter()
            .any(|s| s.requirement == Requirement::Required)
    }

    /// True when every required signal held. Vacuously true without any.
    pub fn required_met(&self) -> bool {
        self.signals
            .iter()
            .filter(|s| s.requirement == Requirement::Required)
            .all(|s| s.matched)
    }

    pub fn missed(&self, requirement: Requirement) -> impl Iterator<Item = &SignalOutcome> {
        self.signals
            .iter()
            .filter(move |s| s.requirement == requirement && !s.matched)
    }

    pub fn keyword_matches(&self) -> usize {
        self.matched_keywords.len()
    }

    pub fn keywords_expected(&self) -> usize {
        self.keywords.len()
    }
}

/// Raw outcome of running one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRun {
    pub scenario_id: String,
    pub description: String,
    pub steps: Vec<StepResult>,

    /// Fixture and baseline problems that lower confidence in the run.
    pub fixture_warnings: Vec<String>,

    pub started_at: DateTime<Utc>,

    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

/// A monotonic count being tracked through the run.
struct TrackedCount {
    target: CountTarget,
    last: u64,
}

/// An index that has to survive the run.
struct TrackedIndex {
    collection: String,
    field: String,
    /// Set once the loss has been reported, so it is reported once.
    reported: bool,
}

impl TrackedIndex {
    fn describe(&self) -> String {
        format!("{} index on {}", self.collection, self.field)
    }
}

/// Store invariants with a usable baseline.
#[derive(Default)]
struct Tracked {
    counts: Vec<TrackedCount>,
    indexes: Vec<TrackedIndex>,
}

/// Drives scenarios against one bot.
pub struct ScenarioRunner {
    client: WebhookClient,
    observer: SignalObserver,
    store: Option<Arc<dyn DocumentStore>>,
    builder: PayloadBuilder,
    timing: TimingConfig,
    interrupt: Interrupt,
}

impl std::fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("endpoint", &self.client.endpoint())
            .field("observer", &self.observer)
            .field("store", &self.store.is_some())
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl ScenarioRunner {
    pub fn new(
        client: WebhookClient,
        observer: SignalObserver,
        builder: PayloadBuilder,
        timing: TimingConfig,
    ) -> Self {
        Self {
            client,
            observer,
            store: None,
            builder,
            timing,
            interrupt: Interrupt::never(),
        }
    }

    /// Wires a runner from configuration.
    ///
    /// A disabled store is not an error; store signals then stay unmatched
    /// and fixtures are reported as skipped.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, RunError> {
        let client = WebhookClient::new(&config.target)?;
        let observer = SignalObserver::new(
            LogTail::new(&config.log.path, config.log.tail_lines),
            config.log.poll_interval(),
        );
        let builder = PayloadBuilder::new(config.user.clone()).with_bot(config.bot.clone());
        let runner = Self::new(client, observer, builder, config.timing.clone());

        match MongoShellStore::from_config(&config.store) {
            Ok(store) => Ok(runner.with_store(Arc::new(store))),
            Err(StoreError::Disabled) => {
                info!("document store disabled");
                Ok(runner)
            }
            Err(e) => Err(RunError::Store(e)),
        }
    }

    /// Attaches a document store for fixtures, invariants and store signals.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.observer = self.observer.with_store(Arc::clone(&store));
        self.store = Some(store);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn store(&self) -> Option<&Arc<dyn DocumentStore>> {
        self.store.as_ref()
    }

    /// Runs every step of `scenario` in order.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioRun, RunError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut interrupt = self.interrupt.clone();

        info!(scenario = %scenario.id, steps = scenario.steps.len(), "starting scenario");

        let mut fixture_warnings = self
            .apply_fixtures(&scenario.fixtures, &mut interrupt)
            .await?;
        let mut tracked = self
            .baseline(&scenario.invariants, &mut fixture_warnings, &mut interrupt)
            .await?;

        let mut ctx = ScenarioContext::default();
        let mut results = Vec::with_capacity(scenario.steps.len());
        let mut halted: Option<String> = None;

        for (index, step) in scenario.steps.iter().enumerate() {
            if let Some(reason) = &halted {
                debug!(step = %step.label, "skipping step");
                results.push(StepResult::skipped(step, reason));
                continue;
            }
            if index > 0 {
                interrupt.sleep(self.timing.step_gap()).await?;
            }

            let mut result = self.run_step(step, &mut ctx, &mut interrupt).await?;
            self.check_invariants(&mut tracked, &mut result, &mut interrupt)
                .await?;

            if step.fail_fast && (!result.sent || !result.required_met()) {
                warn!(step = %step.label, "fail-fast step failed, skipping remaining steps");
                halted = Some(format!("fail-fast step '{}' failed", step.label));
            }
            results.push(result);
        }

        let run = ScenarioRun {
            scenario_id: scenario.id.clone(),
            description: scenario.description.clone(),
            steps: results,
            fixture_warnings,
            started_at,
            elapsed: start.elapsed(),
        };
        info!(
            scenario = %run.scenario_id,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "scenario finished"
        );
        Ok(run)
    }

    async fn run_step(
        &self,
        step: &Step,
        ctx: &mut ScenarioContext,
        interrupt: &mut Interrupt,
    ) -> Result<StepResult, RunError> {
        let mut result = StepResult::pending(step);
        let builder = match &step.identity {
            Some(identity) => self.builder.for_identity(identity.clone()),
            None => self.builder.clone(),
        };

        let (payload, sent_text): (ProbePayload, Option<String>) = match &step.probe {
            ProbeSpec::Text { text, reply_to } => {
                let reply = reply_to.as_ref().and_then(|target| {
                    let resolved = ctx.resolve(target);
                    if resolved.is_none() {
                        result
                            .warnings
                            .push(format!("reply target {target:?} not found; sent without reply"));
                    }
                    resolved
                });
                let message = builder.text_message(text.clone(), reply)?;
                (message.into(), Some(text.clone()))
            }
            ProbeSpec::Callback { data, origin } => {
                let origin_id = origin.as_ref().and_then(|label| {
                    let id = ctx.get(label).map(|r| r.message_id);
                    if id.is_none() {
                        result
                            .warnings
                            .push(format!("origin step '{label}' not found; fresh message id used"));
                    }
                    id
                });
                (builder.callback(data.clone(), origin_id)?.into(), None)
            }
        };

        let probe_ctx = ProbeContext::from_payload(&payload);
        let signals = compile_all(&step.signals, &probe_ctx)?;

        let cursor = self.observer.cursor();
        info!(step = %step.label, probe = %payload.describe(), "sending probe");

        let sent_at = Instant::now();
        let delivery = interrupt.guard(self.client.send(&payload)).await?;
        result.latency = sent_at.elapsed();

        match delivery {
            Ok(delivery) => {
                result.sent = true;
                result.status = Some(delivery.status);
                // Only messages the bot accepted can be replied to later.
                ctx.record(&step.label, payload.message_id(), sent_text);
            }
            Err(e) => {
                warn!(step = %step.label, reason = e.reason(), error = %e, "delivery failed");
                result.status = e.status();
                result.transport_error = Some(e.to_string());
                return Ok(result);
            }
        }

        interrupt.sleep(self.timing.scaled(step.settle)).await?;

        let observation = self
            .observer
            .await_signals(
                payload.chat_id(),
                &signals,
                &cursor,
                self.timing.scaled(step.budget),
                interrupt,
            )
            .await?;

        record_observation(&mut result, &observation);
        Ok(result)
    }

    async fn apply_fixtures(
        &self,
        fixtures: &[Fixture],
        interrupt: &mut Interrupt,
    ) -> Result<Vec<String>, Interrupted> {
        let mut warnings = Vec::new();
        if fixtures.is_empty() {
            return Ok(warnings);
        }
        let Some(store) = &self.store else {
            warnings.push("document store disabled; fixtures skipped".to_string());
            return Ok(warnings);
        };

        let chat_id = self.builder.identity().chat_id;
        for fixture in fixtures {
            match fixture {
                Fixture::ClearField { field } => {
                    match interrupt.guard(store.set_field_null(chat_id, field)).await? {
                        Ok(true) => info!(chat_id, field = %field, "fixture cleared field"),
                        Ok(false) => warnings.push(format!(
                            "fixture: no user document for chat {chat_id}; '{field}' not cleared"
                        )),
                        Err(e) => warnings.push(format!("fixture: clearing '{field}' failed: {e}")),
                    }
                }
                Fixture::Inspect { field } => {
                    match interrupt.guard(store.find_user(chat_id)).await? {
                        Ok(Some(doc)) => {
                            let value = field
                                .split('.')
                                .try_fold(&doc, |v, key| v.get(key))
                                .cloned()
                                .unwrap_or(serde_json::Value::Null);
                            info!(chat_id, field = %field, value = %value, "fixture inspected field");
                        }
                        Ok(None) => {
                            warnings.push(format!("fixture: no user document for chat {chat_id}"));
                        }
                        Err(e) => {
                            warnings.push(format!("fixture: inspecting '{field}' failed: {e}"));
                        }
                    }
                }
            }
        }

        for warning in &warnings {
            warn!("{warning}");
        }
        Ok(warnings)
    }

    async fn baseline(
        &self,
        invariants: &[Invariant],
        warnings: &mut Vec<String>,
        interrupt: &mut Interrupt,
    ) -> Result<Tracked, Interrupted> {
        let mut tracked = Tracked::default();
        if invariants.is_empty() {
            return Ok(tracked);
        }
        let Some(store) = &self.store else {
            warnings.push("document store disabled; invariants not checked".to_string());
            return Ok(tracked);
        };

        for invariant in invariants {
            match invariant {
                Invariant::MonotonicCount(target) => {
                    match interrupt.guard(count(store.as_ref(), target)).await? {
                        Ok(last) => {
                            info!(invariant = %target, count = last, "invariant baseline");
                            tracked.counts.push(TrackedCount {
                                target: target.clone(),
                                last,
                            });
                        }
                        Err(e) => warnings.push(format!("baseline for {target} unavailable: {e}")),
                    }
                }
                Invariant::IndexPresent { collection, field } => {
                    match interrupt.guard(store.list_indexes(collection)).await? {
                        Ok(indexes) => {
                            let present = indexes.iter().any(|i| i.covers(field));
                            info!(collection = %collection, field = %field, present, "index baseline");
                            tracked.indexes.push(TrackedIndex {
                                collection: collection.clone(),
                                field: field.clone(),
                                reported: false,
                            });
                        }
                        Err(e) => warnings.push(format!(
                            "baseline for {collection} indexes unavailable: {e}"
                        )),
                    }
                }
            }
        }
        Ok(tracked)
    }

    async fn check_invariants(
        &self,
        tracked: &mut Tracked,
        result: &mut StepResult,
        interrupt: &mut Interrupt,
    ) -> Result<(), Interrupted> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for entry in &mut tracked.counts {
            match interrupt.guard(count(store.as_ref(), &entry.target)).await? {
                Ok(now) if now < entry.last => {
                    warn!(invariant = %entry.target, before = entry.last, now, "count decreased");
                    result.critical_failures.push(format!(
                        "{} decreased from {} to {}",
                        entry.target, entry.last, now
                    ));
                    entry.last = now;
                }
                Ok(now) => {
                    debug!(invariant = %entry.target, count = now, "invariant holds");
                    entry.last = now;
                }
                Err(e) => result
                    .warnings
                    .push(format!("could not check {}: {e}", entry.target)),
            }
        }
        for entry in &mut tracked.indexes {
            match interrupt.guard(store.list_indexes(&entry.collection)).await? {
                Ok(indexes) if indexes.iter().any(|i| i.covers(&entry.field)) => {
                    debug!(collection = %entry.collection, field = %entry.field, "index present");
                    entry.reported = false;
                }
                Ok(_) if entry.reported => {}
                Ok(_) => {
                    warn!(collection = %entry.collection, field = %entry.field, "index missing");
                    result
                        .critical_failures
                        .push(format!("{} is missing", entry.describe()));
                    entry.reported = true;
                }
                Err(e) => result
                    .warnings
                    .push(format!("could not check {}: {e}", entry.describe())),
            }
        }
        Ok(())
    }
}

async fn count(store: &dyn DocumentStore, target: &CountTarget) -> Result<u64, StoreError> {
    match target {
        CountTarget::Documents(collection) => store.count_documents(collection).await,
        CountTarget::Collections => store.count_collections().await,
    }
}

fn record_observation(result: &mut StepResult, observation: &Observation) {
    for outcome in &mut result.signals {
        outcome.matched = observation.is_matched(&outcome.name);
        if outcome.critical && !outcome.matched {
            let verb = match outcome.expectation {
                Expectation::Present => "was not observed",
                Expectation::Absent => "was observed but must be absent",
            };
            result
                .critical_failures
                .push(format!("signal '{}' {verb}", outcome.name));
        }
    }

    let window = observation.window.join("\n").to_lowercase();
    result.matched_keywords = result
        .keywords
        .iter()
        .filter(|k| window.contains(&k.to_lowercase()))
        .cloned()
        .collect();

    result.warnings.extend(observation.degraded.iter().cloned());
}

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("run interrupted")]
    Interrupted(#[from] Interrupted),

    #[error("invalid probe: {0}")]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("webhook client setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("document store setup failed: {0}")]
    Store(#[from] StoreError),
}

impl RunError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Interrupted(_) => 130,
            _ => 1,
        }
    }
}

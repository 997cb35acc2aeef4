//! Whole-scenario runs against a scripted fake bot.
//!
//! The fake bot is a mockito webhook whose response callback appends log lines
//! to a temp file, and a [`FakeStore`] sharing state with it. Timing is scaled
//! down so each run finishes in well under a second.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use botprobe_e2e::scenarios::{self, DatabaseSafetyScenario, ResetContextScenario, ScenarioDefinition};
use botprobe_e2e::{
    DocumentStore, HarnessConfig, IndexInfo, Interrupt, ReplyTarget, RunError, Scenario,
    ScenarioRunner, SignalError, SignalSpec, Step, StoreError, summarize,
};
use botprobe_telegram::UserIdentity;
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{Value, json};
use tempfile::TempDir;

const TOKEN: &str = "test-token";
const CHAT_ID: i64 = 4242;

#[derive(Debug)]
struct BotState {
    user: Value,
    users: u64,
    collections: u64,
    indexes: Vec<IndexInfo>,
    reset: bool,
}

fn index(name: &str, field: &str) -> IndexInfo {
    let mut key = serde_json::Map::new();
    key.insert(field.to_string(), json!(1));
    IndexInfo {
        name: name.to_string(),
        key,
    }
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            user: json!({ "chatId": CHAT_ID, "lastContextReset": "2026-01-01T00:00:00Z" }),
            users: 10,
            collections: 5,
            indexes: vec![index("_id_", "_id"), index("chatId_1", "chatId")],
            reset: false,
        }
    }
}

type Shared = Arc<Mutex<BotState>>;

struct FakeStore {
    state: Shared,
    /// Added to every fixture write.
    delay: Duration,
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn find_user(&self, chat_id: i64) -> Result<Option<Value>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok((chat_id == CHAT_ID).then(|| state.user.clone()))
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        assert_eq!(collection, "Users");
        Ok(self.state.lock().unwrap().users)
    }

    async fn count_collections(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().unwrap().collections)
    }

    async fn set_field_null(&self, chat_id: i64, field: &str) -> Result<bool, StoreError> {
        tokio::time::sleep(self.delay).await;
        if chat_id != CHAT_ID {
            return Ok(false);
        }
        self.state.lock().unwrap().user[field] = Value::Null;
        Ok(true)
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        assert_eq!(collection, "Users");
        Ok(self.state.lock().unwrap().indexes.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// What the fake bot writes to its log for one incoming update.
type Script = fn(&Value, &mut BotState) -> Vec<String>;

struct Harness {
    _dir: TempDir,
    log: PathBuf,
    server: ServerGuard,
    state: Shared,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("info.log");
        std::fs::File::create(&log).unwrap();
        Self {
            _dir: dir,
            log,
            server: mockito::Server::new_async().await,
            state: Arc::new(Mutex::new(BotState::default())),
        }
    }

    fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.target.base_url = self.server.url();
        config.target.token = TOKEN.to_string();
        config.target.timeout_seconds = 5;
        config.log.path = self.log.clone();
        config.log.poll_interval_ms = 10;
        config.store.enabled = false;
        config.timing.step_gap_ms = 0;
        config.timing.scale = 0.01;
        config.user = UserIdentity::new(CHAT_ID, "probe_user", "Probe");
        config
    }

    fn runner(&self) -> ScenarioRunner {
        self.runner_with(&self.config(), Duration::ZERO)
    }

    fn runner_with(&self, config: &HarnessConfig, store_delay: Duration) -> ScenarioRunner {
        ScenarioRunner::from_config(config)
            .unwrap()
            .with_store(Arc::new(FakeStore {
                state: Arc::clone(&self.state),
                delay: store_delay,
            }))
    }

    async fn bot(&mut self, script: Script) -> Mock {
        let log = self.log.clone();
        let state = Arc::clone(&self.state);
        self.server
            .mock("POST", format!("/webhook/{TOKEN}").as_str())
            .with_status(200)
            .with_body_from_request(move |request| {
                let update: Value = request
                    .body()
                    .ok()
                    .and_then(|body| serde_json::from_slice(body).ok())
                    .unwrap_or(Value::Null);
                let lines = script(&update, &mut state.lock().unwrap());
                append(&log, &lines);
                b"ok".to_vec()
            })
            .create_async()
            .await
    }
}

fn append(path: &Path, lines: &[String]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn text_of(update: &Value) -> Option<&str> {
    update["message"]["text"].as_str()
}

fn callback_of(update: &Value) -> Option<&str> {
    update["callback_query"]["data"].as_str()
}

/// Remembers the conversation until a confirmed reset.
fn well_behaved(update: &Value, state: &mut BotState) -> Vec<String> {
    if callback_of(update) == Some("reset_yes") {
        state.reset = true;
        state.user["lastContextReset"] = json!("2026-10-16T10:00:00Z");
        return vec![format!("User {CHAT_ID} reset confirmed")];
    }
    match text_of(update) {
        Some("/reset") => vec!["Reset confirmation requested".to_string()],
        Some(_) if state.reset => vec![format!(
            "User {CHAT_ID} context reset at 2026-10-16T10:00:00Z, skipping conversation memory"
        )],
        Some(text) => vec![
            format!("Retrieved conversation memory for user {CHAT_ID}"),
            format!("Using context for user {CHAT_ID}"),
            format!("Reply to {text:?}: you are Alex, a software developer in London"),
        ],
        None => Vec::new(),
    }
}

/// Records the reset but keeps loading memory afterwards.
fn leaky(update: &Value, state: &mut BotState) -> Vec<String> {
    let mut lines = well_behaved(update, state);
    if state.reset && text_of(update).is_some() {
        lines.push(format!("Retrieved conversation memory for user {CHAT_ID}"));
    }
    lines
}

/// Drops a user document for every message it handles.
fn destructive(_update: &Value, state: &mut BotState) -> Vec<String> {
    state.users = state.users.saturating_sub(1);
    vec!["Message handled".to_string()]
}

/// Rebuilds its collections on first contact and forgets the chatId index.
fn index_dropping(_update: &Value, state: &mut BotState) -> Vec<String> {
    state.indexes.retain(|i| !i.covers("chatId"));
    vec!["Message handled".to_string()]
}

fn silent(_update: &Value, _state: &mut BotState) -> Vec<String> {
    Vec::new()
}

#[tokio::test]
async fn low_keyword_rate_fails_despite_observed_signals() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(well_behaved).await;

    let scenario = Scenario::new("memory", "memory is used")
        .step(Step::text("intro", "My name is Alex and I work in London"))
        .step(
            Step::text("recall", "Where do I work?")
                .expect(SignalSpec::contains("memory", "Retrieved conversation memory"))
                .expect(SignalSpec::contains("context", "Using context for user"))
                .keywords(["London", "Paris"]),
        );

    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    assert_eq!(report.delivery.hits, 2);
    assert_eq!(report.signal.hits, 1);
    assert_eq!(report.signal.total, 1);
    assert_eq!(report.keyword.hits, 1);
    assert_eq!(report.keyword.total, 2);
    assert_eq!(run.steps[1].matched_keywords, vec!["London"]);
    // 50% keywords is below the 60% default.
    assert!(!report.overall_success);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn reset_scenario_passes_against_a_well_behaved_bot() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(well_behaved).await;

    let scenario = ResetContextScenario::new().build(&harness.config());
    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    assert!(run.fixture_warnings.is_empty(), "{:?}", run.fixture_warnings);
    assert_eq!(report.delivery.hits, 5);
    assert_eq!(report.signal.hits, 2);
    assert_eq!(report.signal.total, 2);
    assert!(report.critical_failures.is_empty(), "{:?}", report.critical_failures);
    assert!(!report.reduced_confidence, "{:?}", report.warnings);
    assert!(report.overall_success);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn memory_after_reset_is_a_critical_failure() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(leaky).await;

    let scenario = ResetContextScenario::new().build(&harness.config());
    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    let after = run.steps.last().unwrap();
    let context_reset = after.signals.iter().find(|s| s.name == "context reset").unwrap();
    assert!(context_reset.matched);
    assert!(
        report
            .critical_failures
            .iter()
            .any(|c| c.starts_with("recall-after:") && c.contains("memory retrieved")),
        "{:?}",
        report.critical_failures
    );
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn shrinking_user_count_fails_despite_good_rates() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(destructive).await;

    let scenario = DatabaseSafetyScenario::new().build(&harness.config());
    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    assert_eq!(harness.state.lock().unwrap().users, 7);
    assert!(report.delivery.meets(report.thresholds.delivery));
    assert!(report.signal.meets(report.thresholds.signal));
    assert!(report.keyword.meets(report.thresholds.keyword));
    assert_eq!(report.critical_failures.len(), 3);
    assert!(report.critical_failures[0].contains("Users documents decreased from 10 to 9"));
    assert!(!report.overall_success);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn lost_user_index_is_reported_once() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(index_dropping).await;

    let scenario = DatabaseSafetyScenario::new().build(&harness.config());
    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    assert_eq!(report.delivery.hits, 3);
    assert_eq!(
        report.critical_failures,
        vec!["new-user-1: Users index on chatId is missing".to_string()]
    );
    assert!(!report.overall_success);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn kept_user_index_passes_database_safety() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(silent).await;

    let scenario = DatabaseSafetyScenario::new().build(&harness.config());
    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    assert!(run.fixture_warnings.is_empty(), "{:?}", run.fixture_warnings);
    assert!(report.critical_failures.is_empty(), "{:?}", report.critical_failures);
    assert!(report.overall_success);
}

#[tokio::test]
async fn fail_fast_step_skips_the_rest() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(silent).await;

    let scenario = Scenario::new("halt", "halts early")
        .step(
            Step::text("first", "/m notes")
                .expect(SignalSpec::contains("detected", "command is detected"))
                .fail_fast(),
        )
        .step(Step::callback("second", "format_team_chat"))
        .step(Step::callback("third", "translate_de"));

    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    assert!(run.steps[0].sent);
    assert!(run.steps[1].is_skipped());
    assert!(run.steps[2].is_skipped());
    assert_eq!(report.delivery.hits, 1);
    assert_eq!(report.delivery.total, 3);
    assert!(report.failures.iter().any(|f| f.starts_with("second: skipped")));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn rejected_delivery_is_recorded_against_the_step() {
    let mut harness = Harness::new().await;
    let _down = harness
        .server
        .mock("POST", format!("/webhook/{TOKEN}").as_str())
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let scenario = Scenario::new("down", "bot is down").step(
        Step::text("hello", "Hello").expect(SignalSpec::contains("reply", "Message handled")),
    );
    let run = harness.runner().run(&scenario).await.unwrap();
    let report = summarize(&run, &harness.config().thresholds);

    let step = &run.steps[0];
    assert!(!step.sent);
    assert_eq!(step.status, Some(500));
    assert!(step.transport_error.is_some());
    assert_eq!(report.delivery.hits, 0);
    assert_eq!(report.signal.total, 1);
    assert!(report.failures.iter().any(|f| f.starts_with("hello: delivery failed")));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn reply_to_a_rejected_step_is_sent_without_reference() {
    let mut harness = Harness::new().await;
    let _down = harness
        .server
        .mock("POST", format!("/webhook/{TOKEN}").as_str())
        .match_body(Matcher::PartialJson(json!({ "message": { "text": "First try" } })))
        .with_status(500)
        .create_async()
        .await;
    let _up = harness
        .server
        .mock("POST", format!("/webhook/{TOKEN}").as_str())
        .match_body(Matcher::PartialJson(json!({ "message": { "text": "Follow-up" } })))
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let scenario = Scenario::new("chain", "reply chain over a failed step")
        .step(Step::text("first", "First try"))
        .step(Step::text("second", "Follow-up").replying_to(ReplyTarget::Step("first".to_string())))
        .step(Step::callback("press", "reset_yes").from_origin("first"));

    let run = harness.runner().run(&scenario).await.unwrap();

    assert!(!run.steps[0].sent);
    assert!(run.steps[1].sent);
    assert!(
        run.steps[1].warnings.iter().any(|w| w.contains("not found")),
        "{:?}",
        run.steps[1].warnings
    );
    assert!(
        run.steps[2].warnings.iter().any(|w| w.contains("origin step 'first' not found")),
        "{:?}",
        run.steps[2].warnings
    );
}

#[tokio::test]
async fn repeated_signal_name_aborts_the_run() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(well_behaved).await;

    let scenario = Scenario::new("dupes", "one name, two signals").step(
        Step::text("ask", "Where do I work?")
            .expect(SignalSpec::contains("memory", "Retrieved conversation memory"))
            .expect(SignalSpec::contains("memory", "Loaded memory").absent()),
    );

    let err = harness.runner().run(&scenario).await.unwrap_err();
    assert!(matches!(err, RunError::Signal(SignalError::DuplicateName(ref name)) if name == "memory"));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn interrupt_during_a_slow_fixture_aborts_the_run() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(well_behaved).await;

    let (tx, interrupt) = Interrupt::channel();
    let runner = harness
        .runner_with(&harness.config(), Duration::from_secs(30))
        .with_interrupt(interrupt);
    let scenario = ResetContextScenario::new().build(&harness.config());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
    });

    let started = std::time::Instant::now();
    let err = runner.run(&scenario).await.unwrap_err();
    assert!(matches!(err, RunError::Interrupted(_)));
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn interrupt_aborts_the_run() {
    let mut harness = Harness::new().await;
    let _bot = harness.bot(silent).await;

    let mut config = harness.config();
    config.timing.scale = 1.0;
    let (tx, interrupt) = Interrupt::channel();
    let runner = ScenarioRunner::from_config(&config)
        .unwrap()
        .with_interrupt(interrupt);

    let scenario = Scenario::new("long", "waits a long time").step(
        Step::text("wait", "Hello")
            .settle(Duration::from_secs(30))
            .expect(SignalSpec::contains("never", "never logged")),
    );

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
    });

    let started = std::time::Instant::now();
    let err = runner.run(&scenario).await.unwrap_err();
    assert!(matches!(err, RunError::Interrupted(_)));
    assert_eq!(err.exit_code(), 130);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn catalog_scenarios_use_the_configured_store_names() {
    let harness = Harness::new().await;
    let mut config = harness.config();
    config.store.users_collection = "Accounts".to_string();

    let scenario = scenarios::find("database-safety").unwrap().build(&config);
    let rendered = format!("{:?}", scenario.invariants);
    assert!(rendered.contains("Accounts"));
}

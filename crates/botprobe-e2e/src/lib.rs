//! # botprobe-e2e
//!
//! Black-box test harness for webhook-driven conversational bots.
//!
//! The harness never looks inside the system under test. It sends synthetic
//! webhook updates, then waits for evidence that the bot behaved correctly:
//! lines appearing in its log file and fields changing in its document store.
//!
//! This crate provides:
//! - Harness configuration (`botprobe.yml` plus environment overrides)
//! - A webhook transport client with a hard client-side timeout
//! - A log tail reader and a document store adapter
//! - A signal observer polling both until a time budget elapses
//! - A scenario model and a sequential scenario runner
//! - Pure result aggregation and a colorized report
//! - The catalog of built-in scenarios
//!
//! # Example
//!
//! ```no_run
//! use botprobe_e2e::{HarnessConfig, ScenarioRunner, report, scenarios};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarnessConfig::from_file("botprobe.yml")?;
//!     let scenario = scenarios::find("conversation-consistency")
//!         .expect("built-in scenario")
//!         .build(&config);
//!
//!     let runner = ScenarioRunner::from_config(&config)?;
//!     let run = runner.run(&scenario).await?;
//!     let report = report::summarize(&run, &config.thresholds);
//!     println!("{}", report.render(false));
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod config;
pub mod interrupt;
pub mod log_tail;
pub mod observer;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod scenarios;
pub mod signal;
pub mod store;
pub mod transport;

pub use config::{
    ConfigError, ConfigWarning, HarnessConfig, LogConfig, StoreConfig, TargetConfig, TimingConfig,
};
pub use interrupt::{Interrupt, Interrupted};
pub use log_tail::{LogCursor, LogTail, TailRead};
pub use observer::{Observation, SignalObserver};
pub use report::{Rate, RunReport, Thresholds, summarize};
pub use runner::{RunError, ScenarioRun, ScenarioRunner, SignalOutcome, StepResult};
pub use scenario::{CountTarget, Fixture, Invariant, ProbeSpec, ReplyTarget, Scenario, Step};
pub use scenarios::ScenarioDefinition;
pub use signal::{
    CompiledSignal, Expectation, FieldPredicate, ProbeContext, Requirement, SignalError,
    SignalMatcher, SignalSpec, compile_all,
};
pub use store::{DocumentStore, IndexInfo, MongoShellStore, StoreError};
pub use transport::{Delivery, TransportError, WebhookClient};

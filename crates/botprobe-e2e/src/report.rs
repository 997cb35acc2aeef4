//! Result aggregation and reporting.
//!
//! [`summarize`] turns the raw step results of a run into rates, failure lists
//! and a verdict. It is pure: the same run and thresholds always produce the
//! same report, and rendering a report twice yields identical text.

use std::fmt;
use std::time::Duration;

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

use crate::runner::{ScenarioRun, StepResult};
use crate::scenario::duration_serde;
use crate::signal::{Expectation, Requirement};

/// Minimum rates, in percent, for a run to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_delivery")]
    pub delivery: f64,

    #[serde(default = "default_signal")]
    pub signal: f64,

    #[serde(default = "default_keyword")]
    pub keyword: f64,
}

fn default_delivery() -> f64 {
    80.0
}

fn default_signal() -> f64 {
    70.0
}

fn default_keyword() -> f64 {
    60.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            delivery: default_delivery(),
            signal: default_signal(),
            keyword: default_keyword(),
        }
    }
}

/// A hit ratio. Without any eligible items there is no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub hits: usize,
    pub total: usize,
}

impl Rate {
    pub fn new(hits: usize, total: usize) -> Self {
        Self { hits, total }
    }

    /// Percentage, or `None` when there is no data.
    pub fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 * 100.0 / self.total as f64)
    }

    /// A rate without data passes vacuously.
    pub fn meets(&self, threshold: f64) -> bool {
        self.value().is_none_or(|v| v >= threshold)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{v:.1}% ({}/{})", self.hits, self.total),
            None => f.write_str("n/a (no data)"),
        }
    }
}

/// The verdict on one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario_id: String,
    pub description: String,
    pub steps: Vec<StepResult>,

    pub delivery: Rate,
    pub signal: Rate,
    pub keyword: Rate,
    pub thresholds: Thresholds,

    pub failures: Vec<String>,
    pub critical_failures: Vec<String>,
    pub warnings: Vec<String>,

    /// Fixtures or observation were incomplete; results may understate the bot.
    pub reduced_confidence: bool,

    pub overall_success: bool,

    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

/// Aggregates a run against `thresholds`.
///
/// - delivery: accepted probes over all steps
/// - signal: steps whose required signals all held over steps with at least
///   one required signal; a step that was never sent counts as a miss
/// - keyword: keywords found over keywords expected, for sent steps only
///
/// Advisory signals never count against the signal rate; misses become
/// warnings.
pub fn summarize(run: &ScenarioRun, thresholds: &Thresholds) -> RunReport {
    let steps = &run.steps;

    let delivery = Rate::new(steps.iter().filter(|s| s.sent).count(), steps.len());

    let eligible: Vec<&StepResult> = steps.iter().filter(|s| s.has_required_signals()).collect();
    let signal = Rate::new(
        eligible.iter().filter(|s| s.sent && s.required_met()).count(),
        eligible.len(),
    );

    let sent: Vec<&StepResult> = steps.iter().filter(|s| s.sent).collect();
    let keyword = Rate::new(
        sent.iter().map(|s| s.keyword_matches()).sum(),
        sent.iter().map(|s| s.keywords_expected()).sum(),
    );

    let mut failures = Vec::new();
    let mut critical_failures = Vec::new();
    let mut warnings = run.fixture_warnings.clone();

    for step in steps {
        if let Some(reason) = &step.skipped {
            failures.push(format!("{}: skipped ({reason})", step.label));
            continue;
        }
        if !step.sent {
            let error = step.transport_error.as_deref().unwrap_or("not delivered");
            failures.push(format!("{}: delivery failed: {error}", step.label));
        } else {
            for missed in step.missed(Requirement::Required) {
                failures.push(format!("{}: {}", step.label, describe_miss(missed.expectation, &missed.name)));
            }
            for missed in step.missed(Requirement::Advisory) {
                warnings.push(format!(
                    "{}: advisory {}",
                    step.label,
                    describe_miss(missed.expectation, &missed.name)
                ));
            }
        }
        critical_failures.extend(
            step.critical_failures
                .iter()
                .map(|c| format!("{}: {c}", step.label)),
        );
        warnings.extend(step.warnings.iter().map(|w| format!("{}: {w}", step.label)));
    }

    for (name, rate, threshold) in [
        ("delivery", delivery, thresholds.delivery),
        ("signal", signal, thresholds.signal),
        ("keyword", keyword, thresholds.keyword),
    ] {
        if !rate.meets(threshold) {
            failures.push(format!("{name} rate {rate} is below {threshold:.0}%"));
        }
    }

    let reduced_confidence =
        !run.fixture_warnings.is_empty() || steps.iter().any(|s| !s.warnings.is_empty());

    let overall_success = delivery.meets(thresholds.delivery)
        && signal.meets(thresholds.signal)
        && keyword.meets(thresholds.keyword)
        && critical_failures.is_empty();

    RunReport {
        scenario_id: run.scenario_id.clone(),
        description: run.description.clone(),
        steps: steps.clone(),
        delivery,
        signal,
        keyword,
        thresholds: thresholds.clone(),
        failures,
        critical_failures,
        warnings,
        reduced_confidence,
        overall_success,
        elapsed: run.elapsed,
    }
}

fn describe_miss(expectation: Expectation, name: &str) -> String {
    match expectation {
        Expectation::Present => format!("signal '{name}' not observed"),
        Expectation::Absent => format!("signal '{name}' observed but expected absent"),
    }
}

/// Optional coloring for rendered text.
struct Palette {
    enabled: bool,
}

impl Palette {
    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.enabled {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn ok(&self, text: &str) -> String {
        self.paint(text, |t| t.green())
    }

    fn bad(&self, text: &str) -> String {
        self.paint(text, |t| t.red())
    }

    fn warn(&self, text: &str) -> String {
        self.paint(text, |t| t.yellow())
    }

    fn dim(&self, text: &str) -> String {
        self.paint(text, |t| t.dimmed())
    }

    fn heading(&self, text: &str) -> String {
        self.paint(text, |t| t.bold().cyan())
    }

    fn verdict(&self, passed: bool, text: &str) -> String {
        if passed {
            self.paint(text, |t| t.bold().green())
        } else {
            self.paint(text, |t| t.bold().red())
        }
    }
}

const RULE_WIDTH: usize = 79;

impl RunReport {
    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.overall_success)
    }

    /// Renders the report as terminal text. Deterministic for a given report.
    pub fn render(&self, use_colors: bool) -> String {
        let p = Palette {
            enabled: use_colors,
        };
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = String::new();

        out.push_str(&p.heading(&rule));
        out.push('\n');
        out.push_str(&p.heading(&format!(" SCENARIO {}", self.scenario_id)));
        out.push('\n');
        if !self.description.is_empty() {
            out.push_str(&format!(" {}\n", self.description));
        }
        out.push_str(&p.heading(&rule));
        out.push_str("\n\n");

        if self.steps.is_empty() {
            out.push_str(&p.dim("  (no steps)"));
            out.push('\n');
        }
        for (index, step) in self.steps.iter().enumerate() {
            Self::render_step(&p, index + 1, step, &mut out);
        }

        out.push('\n');
        out.push_str(&p.heading("METRICS"));
        out.push('\n');
        let metrics = [
            ("Delivery", self.delivery, self.thresholds.delivery),
            ("Signals", self.signal, self.thresholds.signal),
            ("Keywords", self.keyword, self.thresholds.keyword),
        ];
        for (i, (name, rate, threshold)) in metrics.iter().enumerate() {
            let branch = if i + 1 == metrics.len() { "└─" } else { "├─" };
            let value = rate.to_string();
            let value = if rate.meets(*threshold) {
                p.ok(&value)
            } else {
                p.bad(&value)
            };
            out.push_str(&format!(
                "  {branch} {name:<9} {value} {}\n",
                p.dim(&format!("(threshold {threshold:.0}%)"))
            ));
        }

        render_list(&p, "CRITICAL FAILURES", &self.critical_failures, &mut out, Palette::bad);
        render_list(&p, "FAILURES", &self.failures, &mut out, Palette::bad);
        render_list(&p, "WARNINGS", &self.warnings, &mut out, Palette::warn);

        if self.reduced_confidence {
            out.push('\n');
            out.push_str(&p.warn("Reduced confidence: fixtures or observation were incomplete."));
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&p.heading(&rule));
        out.push('\n');
        let verdict = if self.overall_success {
            format!(" PASSED {}", self.scenario_id)
        } else {
            format!(" FAILED {}", self.scenario_id)
        };
        out.push_str(&p.verdict(self.overall_success, &verdict));
        out.push('\n');
        out.push_str(&p.heading(&rule));
        out.push('\n');
        out
    }

    fn render_step(p: &Palette, number: usize, step: &StepResult, out: &mut String) {
        let (mark, state) = if let Some(reason) = &step.skipped {
            (p.dim("-"), p.dim(&format!("skipped: {reason}")))
        } else if !step.sent {
            let error = step.transport_error.as_deref().unwrap_or("not delivered");
            (p.bad("✗"), p.bad(error))
        } else if step.required_met() && step.critical_failures.is_empty() {
            (
                p.ok("✓"),
                p.ok(&format!(
                    "HTTP {} in {}ms",
                    step.status.unwrap_or(200),
                    step.latency.as_millis()
                )),
            )
        } else {
            (
                p.warn("!"),
                p.warn(&format!(
                    "HTTP {} in {}ms",
                    step.status.unwrap_or(200),
                    step.latency.as_millis()
                )),
            )
        };
        out.push_str(&format!(
            "{mark} [{number}] {} {} {state}\n",
            step.label,
            p.dim(&step.description)
        ));

        if step.is_skipped() || !step.sent {
            return;
        }
        for signal in &step.signals {
            let tag = match signal.requirement {
                Requirement::Required => "",
                Requirement::Advisory => " (advisory)",
            };
            let absent = match signal.expectation {
                Expectation::Present => "",
                Expectation::Absent => "no ",
            };
            let line = format!("{absent}{}{tag}", signal.name);
            let rendered = if signal.matched {
                p.ok(&format!("+ {line}"))
            } else if signal.requirement == Requirement::Advisory {
                p.warn(&format!("? {line}"))
            } else {
                p.bad(&format!("- {line}"))
            };
            out.push_str(&format!("      {rendered}\n"));
        }
        if !step.keywords.is_empty() {
            out.push_str(&format!(
                "      keywords {}/{}: {}\n",
                step.keyword_matches(),
                step.keywords_expected(),
                step.keywords
                    .iter()
                    .map(|k| if step.matched_keywords.contains(k) {
                        p.ok(k)
                    } else {
                        p.dim(k)
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }
}

fn render_list(
    p: &Palette,
    title: &str,
    items: &[String],
    out: &mut String,
    style: fn(&Palette, &str) -> String,
) {
    if items.is_empty() {
        return;
    }
    out.push('\n');
    out.push_str(&p.heading(&format!("{title} ({})", items.len())));
    out.push('\n');
    for item in items {
        out.push_str(&format!("  • {}\n", style(p, item)));
    }
}

//! Display functions for terminal output outside the run report: the scenario
//! catalog, store statistics and the interrupted-run banner.

use std::time::Duration;

use botprobe_e2e::{IndexInfo, ScenarioDefinition, StoreError};
use colored::Colorize;

const BANNER_WIDTH: usize = 79;
const DESCRIPTION_WIDTH: usize = 52;

/// Prints the built-in scenarios as a table.
///
/// ```text
/// ID                         TIER            DESCRIPTION
/// conversation-consistency   Memory          Bot keeps conversation memory across...
/// ```
pub fn print_catalog(definitions: &[Box<dyn ScenarioDefinition>]) {
    let id_width = definitions
        .iter()
        .map(|d| d.id().len())
        .max()
        .unwrap_or(2)
        .max(2)
        + 3;

    println!(
        "{}",
        format!("{:<id_width$}{:<16}DESCRIPTION", "ID", "TIER").bold()
    );
    for definition in definitions {
        println!(
            "{}{}{}",
            format!("{:<id_width$}", definition.id()).cyan(),
            format!("{:<16}", definition.tier()).dimmed(),
            truncate(definition.description(), DESCRIPTION_WIDTH)
        );
    }
}

/// What `botprobe store-stats` found out about the store.
#[derive(Debug)]
pub struct StoreStats {
    pub database: String,
    pub ping: Result<(), StoreError>,
    pub counts: Vec<(String, Result<u64, StoreError>)>,
    pub collections: Option<Result<u64, StoreError>>,
    pub indexes: Vec<(String, Result<Vec<IndexInfo>, StoreError>)>,
}

impl StoreStats {
    pub fn has_errors(&self) -> bool {
        self.ping.is_err()
            || self.counts.iter().any(|(_, c)| c.is_err())
            || self.collections.as_ref().is_some_and(Result::is_err)
            || self.indexes.iter().any(|(_, i)| i.is_err())
    }
}

/// Prints connection status, document counts and indexes per collection.
/// Failed queries are shown inline.
pub fn print_store_stats(stats: &StoreStats) {
    println!("{} {}", "Database".bold(), stats.database.cyan());
    match &stats.ping {
        Ok(()) => println!("{} {}", "Connection".bold(), "ok".green()),
        Err(e) => println!("{} {}", "Connection".bold(), format!("error: {e}").red()),
    }

    let name_width = stats
        .counts
        .iter()
        .map(|(name, _)| name.len())
        .chain(stats.indexes.iter().map(|(name, _)| name.len()))
        .max()
        .unwrap_or(0)
        + 3;

    if !stats.counts.is_empty() {
        println!("{}", "Documents".bold());
    }
    for (name, count) in &stats.counts {
        match count {
            Ok(n) => println!("  {name:<name_width$}{n:>10}"),
            Err(e) => println!("  {name:<name_width$}{}", format!("error: {e}").red()),
        }
    }

    match &stats.collections {
        Some(Ok(n)) => println!("{} {n}", "Collections".bold()),
        Some(Err(e)) => println!("{} {}", "Collections".bold(), format!("error: {e}").red()),
        None => {}
    }

    if !stats.indexes.is_empty() {
        println!("{}", "Indexes".bold());
    }
    for (name, indexes) in &stats.indexes {
        match indexes {
            Ok(list) if list.is_empty() => println!("  {name:<name_width$}{}", "none".dimmed()),
            Ok(list) => {
                let rendered: Vec<String> = list.iter().map(format_index).collect();
                println!("  {name:<name_width$}{}", rendered.join(", "));
            }
            Err(e) => println!("  {name:<name_width$}{}", format!("error: {e}").red()),
        }
    }
}

/// Formats an index as its name plus the indexed fields, e.g. `chatId_1 (chatId)`.
pub fn format_index(index: &IndexInfo) -> String {
    let fields: Vec<&str> = index.key.keys().map(String::as_str).collect();
    format!("{} ({})", index.name, fields.join(", "))
}

/// Prints the banner shown instead of a report when the operator aborts a run.
pub fn print_interrupted(scenario_id: &str, elapsed: Duration) {
    let separator = "=".repeat(BANNER_WIDTH);
    let content = format!(" INTERRUPTED {scenario_id} after {}", format_elapsed(elapsed));
    println!("\n{}", separator.bold().yellow());
    println!("{}", content.bold().yellow());
    println!("{}", separator.bold().yellow());
}

/// Formats elapsed duration as human-readable string.
pub fn format_elapsed(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Truncates to `max_chars` characters, ending in "..." when shortened.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Integration tests for the `botprobe` binary.
///
/// Most runs use a webhook address nothing listens on, so every delivery is
/// refused immediately and no bot is needed.

const STORE_DISABLED: &str = "store:\n  enabled: false\n";

fn write_config(dir: &Path) -> Result<PathBuf> {
    write_config_with(dir, "http://127.0.0.1:9", 2, STORE_DISABLED)
}

fn write_config_with(
    dir: &Path,
    base_url: &str,
    timeout_seconds: u64,
    store: &str,
) -> Result<PathBuf> {
    let log = dir.join("info.log");
    fs::write(&log, "")?;
    let config = format!(
        r#"
target:
  base_url: {base_url}
  token: "123:TEST"
  timeout_seconds: {timeout_seconds}
log:
  path: {}
  poll_interval_ms: 10
{store}user:
  chat_id: 4242
  username: probe_user
  first_name: Probe
timing:
  step_gap_ms: 0
  scale: 0.01
"#,
        log.display()
    );
    let path = dir.join("botprobe.yml");
    fs::write(&path, config)?;
    Ok(path)
}

fn botprobe(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_botprobe"));
    command
        .current_dir(dir)
        .env_remove("BOTPROBE_BASE_URL")
        .env_remove("BOTPROBE_TOKEN")
        .env_remove("BOTPROBE_LOG_PATH")
        .env_remove("RUST_LOG")
        .arg("--color")
        .arg("never");
    command
}

#[test]
fn test_list_shows_every_scenario() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let output = botprobe(temp_dir.path()).arg("list").output()?;

    assert!(output.status.success(), "list should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for id in [
        "conversation-consistency",
        "reset-context",
        "message-format",
        "reply-format",
        "webhook-smoke",
        "database-safety",
    ] {
        assert!(stdout.contains(id), "missing {id} in:\n{stdout}");
    }
    Ok(())
}

#[test]
fn test_unknown_scenario_exits_1() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_config(temp_dir.path())?;

    let output = botprobe(temp_dir.path())
        .arg("run")
        .arg("no-such-scenario")
        .arg("--config")
        .arg(&config)
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown scenario"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn test_unreachable_bot_fails_with_report_and_json() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_config(temp_dir.path())?;
    let json_path = temp_dir.path().join("report.json");

    let output = botprobe(temp_dir.path())
        .arg("run")
        .arg("reply-format")
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .arg(&json_path)
        .output()?;

    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("SCENARIO reply-format"), "stdout: {stdout}");
    assert!(stdout.contains(" FAILED reply-format"), "stdout: {stdout}");

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
    assert_eq!(report["scenario_id"], "reply-format");
    assert_eq!(report["overall_success"], false);
    assert_eq!(report["delivery"]["hits"], 0);
    Ok(())
}

#[test]
fn test_store_stats_requires_enabled_store() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_config(temp_dir.path())?;

    let output = botprobe(temp_dir.path())
        .arg("store-stats")
        .arg("--config")
        .arg(&config)
        .output()?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("disabled"), "stderr: {stderr}");
    Ok(())
}

/// Stands in for mongosh: answers by the kind of script it is handed.
#[cfg(unix)]
const FAKE_MONGOSH: &str = r#"case "$4" in
  *ping*) echo '{"ok":1}' ;;
  *getIndexes*) echo '[{"name":"_id_","key":{"_id":1}},{"name":"chatId_1","key":{"chatId":1}}]' ;;
  *countDocuments*) echo 12 ;;
  *getCollectionNames*) echo 4 ;;
  *) exit 2 ;;
esac
"#;

#[cfg(unix)]
#[test]
fn test_store_stats_shows_connection_counts_and_indexes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let script = temp_dir.path().join("mongosh.sh");
    fs::write(&script, FAKE_MONGOSH)?;
    let store = format!(
        "store:\n  command: [sh, {}]\n  database: bot_db\n  collections: [Users, History]\n",
        script.display()
    );
    let config = write_config_with(temp_dir.path(), "http://127.0.0.1:9", 2, &store)?;

    let output = botprobe(temp_dir.path())
        .arg("store-stats")
        .arg("--config")
        .arg(&config)
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("Connection ok"), "stdout: {stdout}");
    assert!(stdout.contains("Collections 4"), "stdout: {stdout}");
    assert!(stdout.contains("chatId_1 (chatId)"), "stdout: {stdout}");
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_sigint_during_run_exits_130() -> Result<()> {
    let temp_dir = TempDir::new()?;
    // Accepts connections but never answers, so the first delivery hangs.
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let config = write_config_with(temp_dir.path(), &base_url, 60, STORE_DISABLED)?;

    let mut child = botprobe(temp_dir.path())
        .arg("run")
        .arg("webhook-smoke")
        .arg("--config")
        .arg(&config)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr = child.stderr.take().context("stderr not captured")?;
    let (sending_tx, sending_rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        let mut lines = BufReader::new(stderr).lines().map_while(std::result::Result::ok);
        if lines.any(|line| line.contains("sending probe")) {
            let _ = sending_tx.send(());
        }
        // Keep draining so the child never blocks on a full pipe.
        lines.for_each(drop);
    });

    let waited = sending_rx.recv_timeout(Duration::from_secs(20));
    if waited.is_err() {
        let _ = child.kill();
    }
    waited.context("run never reached the first delivery")?;

    // Give the signal handler tasks time to register.
    thread::sleep(Duration::from_millis(300));
    let kill = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()?;
    assert!(kill.success());

    let output = child.wait_with_output()?;
    let _ = reader.join();
    drop(listener);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(130), "stdout: {stdout}");
    assert!(stdout.contains("INTERRUPTED webhook-smoke"), "stdout: {stdout}");
    Ok(())
}

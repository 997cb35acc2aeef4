//! Document store access.
//!
//! The harness reads the bot's database to observe state changes (a reset
//! timestamp being written, user documents appearing, an index surviving) and,
//! for fixtures only, clears a single field. [`MongoShellStore`] talks to the database through its
//! command-line shell so the harness needs no driver and no network access
//! beyond what the operator's shell already has.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::StoreConfig;

/// Read access (plus fixture writes) to the bot's document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the user document keyed by `chatId`, if any.
    async fn find_user(&self, chat_id: i64) -> Result<Option<Value>, StoreError>;

    /// Counts the documents in `collection`.
    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;

    /// Counts the collections in the database.
    async fn count_collections(&self) -> Result<u64, StoreError>;

    /// Sets `field` to null on the user document. Returns whether a document
    /// matched.
    async fn set_field_null(&self, chat_id: i64, field: &str) -> Result<bool, StoreError>;

    /// Lists the indexes defined on `collection`.
    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError>;

    /// Checks that the store answers at all.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// One index of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,

    /// Indexed fields mapped to their direction or index type.
    pub key: Map<String, Value>,
}

impl IndexInfo {
    /// True when `field` is one of the indexed fields.
    pub fn covers(&self, field: &str) -> bool {
        self.key.contains_key(field)
    }
}

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

fn check_name(name: &str) -> Result<(), StoreError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// [`DocumentStore`] backed by the `mongosh` command-line shell.
///
/// Each call runs `<command...> <database> <extra_args...> --quiet --eval
/// <script>` without a shell and parses the last non-empty line of stdout as
/// JSON.
#[derive(Debug, Clone)]
pub struct MongoShellStore {
    program: String,
    prefix_args: Vec<String>,
    database: String,
    extra_args: Vec<String>,
    users_collection: String,
    timeout: Duration,
}

impl MongoShellStore {
    /// Builds a store from configuration.
    ///
    /// Fails with [`StoreError::Disabled`] when the store is switched off.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if !config.enabled {
            return Err(StoreError::Disabled);
        }
        let (program, prefix_args) = config
            .command
            .split_first()
            .ok_or_else(|| StoreError::Spawn("store command is empty".to_string()))?;
        check_name(&config.database)?;
        check_name(&config.users_collection)?;

        Ok(Self {
            program: program.clone(),
            prefix_args: prefix_args.to_vec(),
            database: config.database.clone(),
            extra_args: config.extra_args.clone(),
            users_collection: config.users_collection.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn eval(&self, script: &str) -> Result<Value, StoreError> {
        trace!(script, "evaluating store script");
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .arg(&self.database)
            .args(&self.extra_args)
            .arg("--quiet")
            .arg("--eval")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| StoreError::Spawn(format!("{}: {e}", self.program)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(|e| StoreError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(StoreError::CommandFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| StoreError::Parse("empty output".to_string()))?;
        serde_json::from_str(line).map_err(|e| StoreError::Parse(format!("{e}: {line}")))
    }

    fn collection(name: &str) -> String {
        format!("db.getCollection(\"{name}\")")
    }
}

#[async_trait]
impl DocumentStore for MongoShellStore {
    async fn find_user(&self, chat_id: i64) -> Result<Option<Value>, StoreError> {
        let script = format!(
            "print(JSON.stringify({}.findOne({{chatId: {chat_id}}})))",
            Self::collection(&self.users_collection)
        );
        let value = self.eval(&script).await?;
        debug!(chat_id, found = !value.is_null(), "queried user document");
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        check_name(collection)?;
        let script = format!(
            "print({}.countDocuments({{}}))",
            Self::collection(collection)
        );
        let value = self.eval(&script).await?;
        value
            .as_u64()
            .ok_or_else(|| StoreError::Parse(format!("expected a count, got {value}")))
    }

    async fn count_collections(&self) -> Result<u64, StoreError> {
        let value = self.eval("print(db.getCollectionNames().length)").await?;
        value
            .as_u64()
            .ok_or_else(|| StoreError::Parse(format!("expected a count, got {value}")))
    }

    async fn set_field_null(&self, chat_id: i64, field: &str) -> Result<bool, StoreError> {
        check_name(field)?;
        let script = format!(
            "const r = {}.updateOne({{chatId: {chat_id}}}, {{$set: {{\"{field}\": null}}}}); \
             print(JSON.stringify({{matched: r.matchedCount}}))",
            Self::collection(&self.users_collection)
        );
        let value = self.eval(&script).await?;
        let matched = value
            .get("matched")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Parse(format!("unexpected update result {value}")))?;
        debug!(chat_id, field, matched, "cleared user field");
        Ok(matched > 0)
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        check_name(collection)?;
        let script = format!(
            "print(JSON.stringify({}.getIndexes().map(i => ({{name: i.name, key: i.key}}))))",
            Self::collection(collection)
        );
        let value = self.eval(&script).await?;
        let indexes: Vec<IndexInfo> = serde_json::from_value(value.clone())
            .map_err(|e| StoreError::Parse(format!("{e}: {value}")))?;
        debug!(collection, count = indexes.len(), "listed indexes");
        Ok(indexes)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let value = self
            .eval("print(JSON.stringify(db.adminCommand({ping: 1})))")
            .await?;
        let ok = value.get("ok").and_then(Value::as_f64).unwrap_or(0.0);
        if ok >= 1.0 {
            Ok(())
        } else {
            Err(StoreError::Unhealthy(value.to_string()))
        }
    }
}

/// Document store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to run store command: {0}")]
    Spawn(String),

    #[error("store command exited with {status:?}: {stderr}")]
    CommandFailed { status: Option<i32>, stderr: String },

    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    #[error("unparseable store output: {0}")]
    Parse(String),

    #[error("store did not acknowledge ping: {0}")]
    Unhealthy(String),

    #[error("invalid collection or field name '{0}'")]
    InvalidName(String),

    #[error("document store is disabled")]
    Disabled,
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A store whose "shell" prints canned output and ignores the script.
    fn canned(stdout: &str) -> MongoShellStore {
        let config = StoreConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("printf '%s\\n' '{stdout}'"),
                "sh".to_string(),
            ],
            ..StoreConfig::default()
        };
        MongoShellStore::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn find_user_parses_document() {
        let store = canned(r#"{"chatId":42,"lastContextReset":null}"#);
        let doc = store.find_user(42).await.unwrap().unwrap();
        assert_eq!(doc["chatId"], 42);
    }

    #[tokio::test]
    async fn find_user_null_is_none() {
        let store = canned("null");
        assert!(store.find_user(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counts_parse_last_line() {
        let config = StoreConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'Current Mongosh Log ID: abc'; echo; echo 17".to_string(),
                "sh".to_string(),
            ],
            ..StoreConfig::default()
        };
        let store = MongoShellStore::from_config(&config).unwrap();
        assert_eq!(store.count_documents("Users").await.unwrap(), 17);
        assert_eq!(store.count_collections().await.unwrap(), 17);
    }

    #[tokio::test]
    async fn set_field_null_reports_match() {
        let store = canned(r#"{"matched":1}"#);
        assert!(store.set_field_null(42, "lastContextReset").await.unwrap());
    }

    #[tokio::test]
    async fn list_indexes_parses_keys() {
        let store = canned(
            r#"[{"name":"_id_","key":{"_id":1}},{"name":"chatId_1","key":{"chatId":1}}]"#,
        );
        let indexes = store.list_indexes("Users").await.unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[1].name, "chatId_1");
        assert!(indexes[1].covers("chatId"));
        assert!(!indexes[0].covers("chatId"));
    }

    #[tokio::test]
    async fn ping_requires_ok() {
        assert!(canned(r#"{"ok":1}"#).ping().await.is_ok());
        assert!(matches!(
            canned(r#"{"ok":0}"#).ping().await,
            Err(StoreError::Unhealthy(_))
        ));
    }

    #[tokio::test]
    async fn failing_command_is_reported() {
        let config = StoreConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'auth failed' >&2; exit 3".to_string(),
                "sh".to_string(),
            ],
            ..StoreConfig::default()
        };
        let store = MongoShellStore::from_config(&config).unwrap();
        let err = store.count_collections().await.unwrap_err();
        assert!(
            matches!(err, StoreError::CommandFailed { status: Some(3), ref stderr } if stderr == "auth failed")
        );
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let config = StoreConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string(), "sh".to_string()],
            timeout_seconds: 1,
            ..StoreConfig::default()
        };
        let store = MongoShellStore::from_config(&config).unwrap();
        assert!(matches!(
            store.count_collections().await,
            Err(StoreError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let config = StoreConfig {
            command: vec!["definitely-not-a-real-mongosh-binary".to_string()],
            ..StoreConfig::default()
        };
        let store = MongoShellStore::from_config(&config).unwrap();
        assert!(matches!(
            store.count_collections().await,
            Err(StoreError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unsafe_names() {
        let store = canned("0");
        assert!(matches!(
            store.count_documents("Users\"); db.dropDatabase(); (\"").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.set_field_null(1, "a b").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.list_indexes("Users;").await,
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn disabled_store_is_not_built() {
        let config = StoreConfig {
            enabled: false,
            ..StoreConfig::default()
        };
        assert!(matches!(
            MongoShellStore::from_config(&config),
            Err(StoreError::Disabled)
        ));
    }
}

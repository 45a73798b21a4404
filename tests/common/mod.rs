//! Shared integration-test harness for spawning `combatlock run` as a child
//! process and exchanging JSONL over stdio.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Default timeout for reading a single record.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running engine with helpers for JSONL I/O.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
#[allow(clippy::missing_panics_doc)]
pub struct CombatlockProcess {
    child: Child,
    stdin: Option<tokio::process::ChildStdin>,
    reader: BufReader<tokio::process::ChildStdout>,
    pending: Vec<Value>,
}

impl CombatlockProcess {
    /// Spawns `combatlock run` with the given policy file.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn(config_path: &Path) -> Self {
        let bin = env!("CARGO_BIN_EXE_combatlock");
        let mut child = Command::new(bin)
            .args([
                "run",
                "--config",
                config_path.to_str().expect("non-UTF-8 config path"),
                "--quiet",
            ])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn combatlock");

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");

        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            pending: Vec::new(),
        }
    }

    /// Runs a one-shot command and collects its output.
    #[allow(clippy::missing_panics_doc)]
    pub fn spawn_command(args: &[&str]) -> std::process::Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_combatlock"))
            .args(args)
            .output()
            .expect("failed to run combatlock")
    }

    /// Writes one event line to stdin.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send(&mut self, event: &Value) {
        let mut buf = serde_json::to_string(event).expect("failed to serialize event");
        buf.push('\n');
        self.send_raw(buf.as_bytes()).await;
    }

    /// Writes raw bytes to stdin.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        stdin.write_all(bytes).await.expect("failed to write to stdin");
        stdin.flush().await.expect("failed to flush stdin");
    }

    /// Reads one record, or `None` at EOF.
    #[allow(clippy::missing_panics_doc)]
    pub async fn read_record(&mut self, timeout: Duration) -> Option<Value> {
        let mut line = String::new();
        let result = tokio::time::timeout(timeout, async {
            loop {
                line.clear();
                let n = self
                    .reader
                    .read_line(&mut line)
                    .await
                    .expect("read_line I/O error");
                if n == 0 {
                    return None;
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    return Some(
                        serde_json::from_str::<Value>(trimmed).unwrap_or_else(|e| {
                            panic!("invalid JSON from engine: {e}\nline: {line}")
                        }),
                    );
                }
            }
        })
        .await;
        result.expect("timed out waiting for a record")
    }

    /// Waits for the first record matching `pred`, buffering the rest.
    #[allow(clippy::missing_panics_doc)]
    pub async fn expect(&mut self, what: &str, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(idx) = self.pending.iter().position(&pred) {
            return self.pending.remove(idx);
        }
        loop {
            let record = self
                .read_record(DEFAULT_TIMEOUT)
                .await
                .unwrap_or_else(|| panic!("EOF while waiting for {what}"));
            if pred(&record) {
                return record;
            }
            self.pending.push(record);
        }
    }

    /// Waits for the outcome record of input line `line`.
    pub async fn expect_outcome(&mut self, line: u64) -> Value {
        let record = self
            .expect(&format!("outcome of line {line}"), |r| {
                (r["type"] == "outcome" || r["type"] == "error") && r["line"] == line
            })
            .await;
        assert_eq!(record["type"], "outcome", "line {line} failed: {record}");
        record["outcome"].clone()
    }

    /// Waits for a notification with `key`.
    pub async fn expect_notification(&mut self, key: &str) -> Value {
        self.expect(&format!("notification {key}"), |r| {
            r["type"] == "notification" && r["key"] == key
        })
        .await
    }

    /// Closes stdin and returns the remaining records and the exit code.
    #[allow(clippy::missing_panics_doc)]
    pub async fn finish(mut self) -> (Vec<Value>, Option<i32>) {
        drop(self.stdin.take());

        let mut rest = std::mem::take(&mut self.pending);
        while let Some(record) = self.read_record(DEFAULT_TIMEOUT).await {
            rest.push(record);
        }

        let status = tokio::time::timeout(Duration::from_secs(5), self.child.wait())
            .await
            .expect("engine did not exit after EOF")
            .expect("failed to wait for engine");
        (rest, status.code())
    }

    /// Returns the path to a test fixture.
    #[must_use]
    pub fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }
}

/// A `presence` event for a fresh participant.
#[must_use]
pub fn presence(id: &str, name: &str, zone: &str) -> Value {
    json!({
        "type": "presence",
        "entity": { "id": id, "name": name, "zone": zone }
    })
}

/// A fresh participant id.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

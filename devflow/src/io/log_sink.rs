//! Log sink for agent and cycle records.
//!
//! Records live in `{dir}/{collection}.jsonl`, one JSON object per line.
//! Sink failures never abort a cycle; callers go through [`record`] and
//! [`count`], which downgrade errors to warnings.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub trait LogSink: Send + Sync {
    fn insert(&self, collection: &str, record: &Value) -> Result<()>;

    /// Records whose top-level fields equal every entry of `filter`, in
    /// insertion order.
    fn query(&self, collection: &str, filter: &Map<String, Value>) -> Result<Vec<Value>>;
}

/// Insert, logging and swallowing failures.
pub fn record(sink: &dyn LogSink, collection: &str, record: &Value) -> bool {
    match sink.insert(collection, record) {
        Ok(()) => true,
        Err(err) => {
            warn!(collection, err = %format!("{err:#}"), "log sink insert failed; continuing");
            false
        }
    }
}

/// Number of records in `collection`; 0 when the sink is unavailable.
pub fn count(sink: &dyn LogSink, collection: &str) -> usize {
    match sink.query(collection, &Map::new()) {
        Ok(records) => records.len(),
        Err(err) => {
            warn!(collection, err = %format!("{err:#}"), "log sink query failed; assuming empty");
            0
        }
    }
}

pub fn matches_filter(record: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

#[derive(Debug)]
pub struct JsonlLogSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        validate_collection(collection)?;
        Ok(self.dir.join(format!("{collection}.jsonl")))
    }
}

fn validate_collection(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("collection name must be non-empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("invalid collection name '{name}'");
    }
    Ok(())
}

impl LogSink for JsonlLogSink {
    fn insert(&self, collection: &str, record: &Value) -> Result<()> {
        let path = self.collection_path(collection)?;
        let mut line = serde_json::to_string(record).context("encode log record")?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("log sink lock poisoned"))?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create log dir {}", self.dir.display()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        debug!(collection, "log record inserted");
        Ok(())
    }

    fn query(&self, collection: &str, filter: &Map<String, Value>) -> Result<Vec<Value>> {
        let path = self.collection_path(collection)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))?;
            if matches_filter(&value, filter) {
                out.push(value);
            }
        }
        Ok(out)
    }
}

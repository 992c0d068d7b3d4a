//! Per-iteration results and the cache file they persist to.
//!
//! The cache file is one JSON array with one element per iteration. Each
//! element maps an experiment name to a `[tag, value]` pair:
//! `[1, {..metrics..}]` for done, `[2, seconds]` for timeout and
//! `[3, {"error": ".."}]` for error.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

use crate::error::{BenchError, Result};
use crate::experiment::{Metrics, Status};

const TAG_NOT_DONE: u8 = 0;
const TAG_DONE: u8 = 1;
const TAG_TIMEOUT: u8 = 2;
const TAG_ERROR: u8 = 3;

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let pair = match self {
            Status::NotDone => (TAG_NOT_DONE, Value::Null),
            Status::Done(metrics) => (TAG_DONE, json!(metrics)),
            Status::Timeout(secs) => (TAG_TIMEOUT, json!(secs)),
            Status::Error(message) => (TAG_ERROR, json!({ "error": message })),
        };
        pair.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (tag, value) = <(u8, Value)>::deserialize(deserializer)?;
        match tag {
            TAG_NOT_DONE => Ok(Status::NotDone),
            TAG_DONE => {
                let metrics = Metrics::deserialize(value).map_err(D::Error::custom)?;
                Ok(Status::Done(metrics))
            }
            TAG_TIMEOUT => {
                let secs = value
                    .as_f64()
                    .filter(|secs| *secs >= 0.0)
                    .ok_or_else(|| D::Error::custom("timeout value must be a number"))?;
                Ok(Status::Timeout(secs as u64))
            }
            TAG_ERROR => {
                let message = match value.get("error") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => value.to_string(),
                };
                Ok(Status::Error(message))
            }
            other => Err(D::Error::custom(format!("unknown status tag {}", other))),
        }
    }
}

/// Statuses of one iteration, keyed by experiment name
pub type IterationResults = BTreeMap<String, Status>;

/// Aggregate counts over every cached status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub done: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub iterations: usize,
}

impl CacheCounts {
    /// Render as `"<prefix> N results, T timeouts, E errors, I iterations."`
    pub fn describe(&self, prefix: &str) -> String {
        format!("{} {}", prefix, self)
    }
}

impl fmt::Display for CacheCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} results, {} timeouts, {} errors, {} iterations.",
            self.done, self.timeouts, self.errors, self.iterations
        )
    }
}

/// Ordered per-iteration results; index `i` holds iteration `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsStore {
    iterations: Vec<IterationResults>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of iteration slots, reached or not
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Make sure slots exist up to and including `iteration`.
    pub fn ensure_iteration(&mut self, iteration: usize) {
        if self.iterations.len() <= iteration {
            self.iterations.resize_with(iteration + 1, IterationResults::new);
        }
    }

    /// Slot for one iteration, if it exists
    pub fn iteration(&self, iteration: usize) -> Option<&IterationResults> {
        self.iterations.get(iteration)
    }

    /// Returns true if the iteration slot holds at least one status.
    pub fn is_reached(&self, iteration: usize) -> bool {
        self.iterations
            .get(iteration)
            .is_some_and(|slot| !slot.is_empty())
    }

    pub fn get(&self, iteration: usize, name: &str) -> Option<&Status> {
        self.iterations.get(iteration).and_then(|slot| slot.get(name))
    }

    /// Record a status, growing the store as needed.
    pub fn insert(&mut self, iteration: usize, name: impl Into<String>, status: Status) {
        self.ensure_iteration(iteration);
        self.iterations[iteration].insert(name.into(), status);
    }

    /// Iterate over `(iteration, slot)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &IterationResults)> {
        self.iterations.iter().enumerate()
    }

    /// Drop trailing iterations with no entries.
    pub fn trim(&mut self) {
        while self.iterations.last().is_some_and(|slot| slot.is_empty()) {
            self.iterations.pop();
        }
    }

    /// Keep only entries for the given experiment names.
    pub fn retain_names(&mut self, names: &HashSet<&str>) {
        for slot in &mut self.iterations {
            slot.retain(|name, _| names.contains(name.as_str()));
        }
    }

    pub fn clear(&mut self) {
        self.iterations.clear();
    }

    pub fn counts(&self) -> CacheCounts {
        let mut counts = CacheCounts {
            iterations: self.iterations.len(),
            ..CacheCounts::default()
        };
        for status in self.iterations.iter().flat_map(|slot| slot.values()) {
            match status {
                Status::Done(_) => counts.done += 1,
                Status::Timeout(_) => counts.timeouts += 1,
                Status::Error(_) => counts.errors += 1,
                Status::NotDone => {}
            }
        }
        counts
    }

    /// Read a store from a cache file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let store: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| BenchError::Cache(format!("{}: {}", path.display(), e)))?;
        debug!("Read {} iterations from {}", store.len(), path.display());
        Ok(store)
    }

    /// Trim trailing empty iterations, then write the store to a cache file.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.trim();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        debug!("Wrote {} iterations to {}", self.len(), path.display());
        Ok(())
    }
}

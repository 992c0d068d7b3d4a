//! Experiment definition and status derivation
//!
//! An Experiment describes one external command, the group it is scheduled
//! with, and whether it repeats across iterations. Experiments are built once
//! through [`ExperimentBuilder`] and never change after they are registered.
//! The per-kind behavior (log parsing, summarizing, run predicate) lives
//! behind the [`ExperimentKind`] trait.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::{BenchError, Result};

/// Numeric results extracted from a successful run
pub type Metrics = BTreeMap<String, f64>;

/// Raw mapping produced by a log parser; an `error` key marks a failed run
pub type LogRecord = Map<String, Value>;

/// Message recorded when a log exists but nothing could be parsed from it
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Per-kind behavior of an experiment, selected when the experiment is built.
pub trait ExperimentKind: fmt::Debug + Send + Sync {
    /// Parse the contents of a log file.
    ///
    /// Returns `None` when the log does not describe a finished run, or a
    /// record with the results otherwise. A record holding an `error` key
    /// describes a run that finished but failed.
    fn parse_log(&self, contents: &str) -> Option<LogRecord>;

    /// One-line description of the main result.
    fn summarize(&self, metrics: &Metrics) -> String;

    /// Whether this experiment should be scheduled at all.
    fn should_run(&self, _experiment: &Experiment) -> bool {
        true
    }
}

/// Status of one experiment in one iteration
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// No attempt has produced output yet
    NotDone,
    /// The run finished and its log parsed into results
    Done(Metrics),
    /// The run finished but failed, or left an unparseable log
    Error(String),
    /// The run exceeded the timeout recorded here, in seconds
    Timeout(u64),
}

impl Status {
    /// Build a status from a parsed log record.
    pub fn from_record(record: LogRecord) -> Self {
        if let Some(error) = record.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Status::Error(message);
        }
        let metrics = record
            .into_iter()
            .filter_map(|(key, value)| value.as_f64().map(|v| (key, v)))
            .collect();
        Status::Done(metrics)
    }

    /// Returns true for a timeout recorded below the configured timeout.
    ///
    /// Such a result may resolve differently under the larger bound, so it is
    /// never trusted.
    pub fn is_stale_timeout(&self, timeout_secs: u64) -> bool {
        matches!(self, Status::Timeout(recorded) if *recorded < timeout_secs)
    }

    /// Returns true if nothing more should be run for this status.
    pub fn is_settled(&self, timeout_secs: u64) -> bool {
        match self {
            Status::Done(_) | Status::Error(_) => true,
            Status::Timeout(recorded) => *recorded >= timeout_secs,
            Status::NotDone => false,
        }
    }

    /// Returns true if the experiment still needs (another) run.
    pub fn is_outstanding(&self, timeout_secs: u64) -> bool {
        !self.is_settled(timeout_secs)
    }

    /// Short lowercase label, used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Status::NotDone => "not done",
            Status::Done(_) => "done",
            Status::Error(_) => "error",
            Status::Timeout(_) => "timeout",
        }
    }
}

/// Path of the marker file recording the timeout used for a timed-out attempt.
pub fn timeout_marker(logfile: &Path) -> PathBuf {
    with_suffix(logfile, ".timeout")
}

/// Path the partial log of an interrupted attempt is moved to.
pub fn interrupted_log(logfile: &Path) -> PathBuf {
    with_suffix(logfile, ".interrupted")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// One configured external command, identified by a unique name
#[derive(Debug, Clone)]
pub struct Experiment {
    name: String,
    command: Vec<String>,
    group: String,
    repeat: bool,
    env: BTreeMap<String, String>,
    dataset: String,
    solver: String,
    kind: Arc<dyn ExperimentKind>,
}

impl Experiment {
    /// Start building an experiment of the given kind.
    pub fn builder(name: impl Into<String>, kind: Arc<dyn ExperimentKind>) -> ExperimentBuilder {
        ExperimentBuilder::new(name, kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    /// Environment variables set on top of the inherited environment
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Dataset tag, used in exports
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Solver label, used in exports
    pub fn solver(&self) -> &str {
        &self.solver
    }

    /// Whether this experiment takes part in the given iteration.
    pub fn runs_in(&self, iteration: usize) -> bool {
        self.repeat || iteration == 0
    }

    pub fn summarize(&self, metrics: &Metrics) -> String {
        self.kind.summarize(metrics)
    }

    pub fn should_run(&self) -> bool {
        self.kind.should_run(self)
    }

    /// Derive the status of this experiment from its log file.
    ///
    /// A parseable log wins; otherwise a timeout marker decides; otherwise an
    /// existing log is an error and a missing one means the run never happened.
    /// A log that is not valid UTF-8 is an error for the caller, not a status.
    pub fn status_from_log(&self, logfile: &Path) -> Result<Status> {
        let log_exists = logfile.is_file();
        if log_exists {
            let bytes = fs::read(logfile)?;
            let contents = String::from_utf8(bytes).map_err(|_| BenchError::Decode {
                path: logfile.to_path_buf(),
            })?;
            if let Some(record) = self.kind.parse_log(&contents) {
                let status = Status::from_record(record);
                debug!("{}: {} from {}", self.name, status.label(), logfile.display());
                return Ok(status);
            }
        }

        let marker = timeout_marker(logfile);
        if marker.is_file() {
            let recorded = fs::read_to_string(&marker)
                .ok()
                .and_then(|text| text.trim().parse::<u64>().ok());
            return Ok(match recorded {
                Some(secs) => Status::Timeout(secs),
                None => {
                    warn!("Ignoring unreadable timeout marker {}", marker.display());
                    Status::NotDone
                }
            });
        }

        if log_exists {
            Ok(Status::Error(UNKNOWN_ERROR.to_string()))
        } else {
            Ok(Status::NotDone)
        }
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder for [`Experiment`].
///
/// Every method consumes the builder and returns a new one, so a partially
/// configured builder can only be shared by cloning it first.
#[derive(Debug, Clone)]
pub struct ExperimentBuilder {
    name: String,
    command: Vec<String>,
    group: Option<String>,
    repeat: bool,
    env: BTreeMap<String, String>,
    dataset: String,
    solver: String,
    kind: Arc<dyn ExperimentKind>,
}

impl ExperimentBuilder {
    /// Create a builder; the experiment repeats by default and its group
    /// defaults to its name.
    pub fn new(name: impl Into<String>, kind: Arc<dyn ExperimentKind>) -> Self {
        Self {
            name: name.into(),
            command: Vec::new(),
            group: None,
            repeat: true,
            env: BTreeMap::new(),
            dataset: String::new(),
            solver: String::new(),
            kind,
        }
    }

    /// Replace the whole command line
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set an environment variable for the command
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn solver(mut self, solver: impl Into<String>) -> Self {
        self.solver = solver.into();
        self
    }

    /// Append a suffix to the experiment name
    pub fn name_suffix(mut self, suffix: &str) -> Self {
        self.name.push_str(suffix);
        self
    }

    /// Append a suffix to the solver label
    pub fn solver_suffix(mut self, suffix: &str) -> Self {
        self.solver.push_str(suffix);
        self
    }

    /// Name the experiment would get if built now
    pub fn current_name(&self) -> &str {
        &self.name
    }

    pub fn build(self) -> Experiment {
        let group = self.group.unwrap_or_else(|| self.name.clone());
        Experiment {
            name: self.name,
            command: self.command,
            group,
            repeat: self.repeat,
            env: self.env,
            dataset: self.dataset,
            solver: self.solver,
            kind: self.kind,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Kind used across unit tests: a log is finished when it contains
    /// `time: <secs>`, and failed when it contains `failed: <message>`.
    #[derive(Debug)]
    pub(crate) struct TimeKind;

    impl ExperimentKind for TimeKind {
        fn parse_log(&self, contents: &str) -> Option<LogRecord> {
            let mut record = LogRecord::new();
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("time: ") {
                    let secs: f64 = rest.trim().parse().ok()?;
                    record.insert("time".to_string(), Value::from(secs));
                } else if let Some(rest) = line.strip_prefix("failed: ") {
                    record.insert("error".to_string(), Value::from(rest.trim()));
                }
            }
            if record.is_empty() { None } else { Some(record) }
        }

        fn summarize(&self, metrics: &Metrics) -> String {
            format!("{:.6} sec", metrics.get("time").copied().unwrap_or_default())
        }
    }

    pub(crate) fn experiment(name: &str) -> Experiment {
        Experiment::builder(name, Arc::new(TimeKind)).build()
    }

    #[test]
    fn test_builder_defaults() {
        let exp = experiment("alpha");
        assert_eq!(exp.name(), "alpha");
        assert_eq!(exp.group(), "alpha");
        assert!(exp.repeat());
        assert!(exp.command().is_empty());
        assert!(exp.env().is_empty());
    }

    #[test]
    fn test_builder_chaining() {
        let exp = Experiment::builder("game", Arc::new(TimeKind))
            .command(["tools/oink", "game.pg"])
            .arg("-v")
            .args(["--tl", "-w", "1"])
            .group("game")
            .name_suffix("-tl")
            .solver("tl")
            .solver_suffix("-n")
            .dataset("synt")
            .env("OMP_NUM_THREADS", "1")
            .repeat(false)
            .build();

        assert_eq!(exp.name(), "game-tl");
        assert_eq!(exp.group(), "game");
        assert_eq!(exp.solver(), "tl-n");
        assert_eq!(exp.dataset(), "synt");
        assert_eq!(exp.command(), &["tools/oink", "game.pg", "-v", "--tl", "-w", "1"]);
        assert_eq!(exp.env().get("OMP_NUM_THREADS").map(String::as_str), Some("1"));
        assert!(!exp.repeat());
        assert!(exp.runs_in(0));
        assert!(!exp.runs_in(1));
    }

    #[test]
    fn test_cloned_builders_branch_independently() {
        let base = Experiment::builder("game", Arc::new(TimeKind)).arg("oink");
        let a = base.clone().name_suffix("-a").arg("--a").build();
        let b = base.name_suffix("-b").build();
        assert_eq!(a.name(), "game-a");
        assert_eq!(b.name(), "game-b");
        assert_eq!(b.command(), &["oink"]);
    }

    #[test]
    fn test_marker_paths() {
        let log = Path::new("logs/game-tl-0");
        assert_eq!(timeout_marker(log), PathBuf::from("logs/game-tl-0.timeout"));
        assert_eq!(interrupted_log(log), PathBuf::from("logs/game-tl-0.interrupted"));
    }

    #[test]
    fn test_status_from_record() {
        let mut record = LogRecord::new();
        record.insert("time".to_string(), Value::from(1.5));
        record.insert("nodes".to_string(), Value::from(10));
        let status = Status::from_record(record);
        let Status::Done(metrics) = status else {
            panic!("expected done");
        };
        assert_eq!(metrics.get("time"), Some(&1.5));
        assert_eq!(metrics.get("nodes"), Some(&10.0));

        let mut record = LogRecord::new();
        record.insert("error".to_string(), Value::from("segfault"));
        assert_eq!(Status::from_record(record), Status::Error("segfault".to_string()));
    }

    #[test]
    fn test_status_predicates() {
        assert!(Status::NotDone.is_outstanding(10));
        assert!(Status::Done(Metrics::new()).is_settled(10));
        assert!(Status::Error("x".to_string()).is_settled(10));
        assert!(Status::Timeout(10).is_settled(10));
        assert!(Status::Timeout(5).is_outstanding(10));
        assert!(Status::Timeout(5).is_stale_timeout(10));
        assert!(!Status::Timeout(20).is_stale_timeout(10));
        assert!(!Status::NotDone.is_stale_timeout(10));
    }

    #[test]
    fn test_status_missing_log_is_not_done() {
        let dir = TempDir::new().unwrap();
        let exp = experiment("alpha");
        let status = exp.status_from_log(&dir.path().join("alpha-0")).unwrap();
        assert_eq!(status, Status::NotDone);
    }

    #[test]
    fn test_status_parsed_log_is_done() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, "starting\ntime: 2.5\n").unwrap();
        let status = experiment("alpha").status_from_log(&log).unwrap();
        assert_eq!(status, Status::Done(Metrics::from([("time".to_string(), 2.5)])));
    }

    #[test]
    fn test_status_error_record() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, "failed: out of memory\n").unwrap();
        let status = experiment("alpha").status_from_log(&log).unwrap();
        assert_eq!(status, Status::Error("out of memory".to_string()));
    }

    #[test]
    fn test_status_timeout_marker() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, "partial output").unwrap();
        fs::write(timeout_marker(&log), "300").unwrap();
        let status = experiment("alpha").status_from_log(&log).unwrap();
        assert_eq!(status, Status::Timeout(300));
    }

    #[test]
    fn test_status_unparseable_log_is_unknown_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, "segmentation fault").unwrap();
        let status = experiment("alpha").status_from_log(&log).unwrap();
        assert_eq!(status, Status::Error(UNKNOWN_ERROR.to_string()));
    }

    #[test]
    fn test_status_garbage_marker_is_not_done() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, "partial").unwrap();
        fs::write(timeout_marker(&log), "soon").unwrap();
        let status = experiment("alpha").status_from_log(&log).unwrap();
        assert_eq!(status, Status::NotDone);
    }

    #[test]
    fn test_status_invalid_utf8_is_fatal() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let err = experiment("alpha").status_from_log(&log).unwrap_err();
        assert!(matches!(err, BenchError::Decode { .. }));
    }

    #[test]
    fn test_status_from_log_leaves_files_untouched() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alpha-0");
        fs::write(&log, "time: 1.0\n").unwrap();
        let exp = experiment("alpha");
        let first = exp.status_from_log(&log).unwrap();
        let second = exp.status_from_log(&log).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&log).unwrap(), "time: 1.0\n");
        assert!(!timeout_marker(&log).exists());
    }
}

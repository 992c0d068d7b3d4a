//! Log parser for the parity game solver.

use regex::Regex;
use serde_json::Value;

use crate::error::Result;
use crate::experiment::{ExperimentKind, LogRecord, Metrics};

/// Parses solver logs; a log counts only once the solution was verified.
#[derive(Debug, Clone)]
pub struct OinkLog {
    verified: Regex,
    solving: Regex,
    preprocessing: Regex,
    total: Regex,
    size: Regex,
    priorities: Regex,
    major_minor: Regex,
    iterations: Regex,
    promotions: Regex,
    tangles: Regex,
    tangles_iterations: Regex,
}

impl OinkLog {
    pub fn new() -> Result<Self> {
        Ok(Self {
            verified: Regex::new(r"solution verified")?,
            solving: Regex::new(r"solving took ([\d.,]+)")?,
            preprocessing: Regex::new(r"preprocessing took ([\d.,]+)")?,
            total: Regex::new(r"total solving time: ([\d.,]+)")?,
            size: Regex::new(r"with (\d+) nodes and (\d+) edges")?,
            priorities: Regex::new(r"(\d+) priorities")?,
            major_minor: Regex::new(r"solved with ([\d.,]+) major iterations, ([\d.,]+) minor iterations")?,
            iterations: Regex::new(r"solved with ([\d.,]+) iterations")?,
            promotions: Regex::new(r"solved with ([\d.,]+) promotions")?,
            tangles: Regex::new(r"solved with (\d+) tangles")?,
            tangles_iterations: Regex::new(r"solved with ([\d.,]+) tangles and ([\d.,]+) iterations")?,
        })
    }
}

/// Parse a number as printed by the solver, ignoring thousands separators.
fn number(text: &str) -> Option<f64> {
    text.replace(',', "").parse().ok()
}

fn capture(re: &Regex, contents: &str, group: usize) -> Option<f64> {
    re.captures(contents)
        .and_then(|caps| caps.get(group))
        .and_then(|m| number(m.as_str()))
}

fn count(value: f64) -> Value {
    Value::from(value as u64)
}

impl ExperimentKind for OinkLog {
    fn parse_log(&self, contents: &str) -> Option<LogRecord> {
        if !self.verified.is_match(contents) {
            return None;
        }
        let mut record = LogRecord::new();
        let mut set = |key: &str, value: Value| {
            record.insert(key.to_string(), value);
        };

        set("solving", Value::from(capture(&self.solving, contents, 1).unwrap_or(0.0)));
        set(
            "preprocessing",
            Value::from(capture(&self.preprocessing, contents, 1).unwrap_or(0.0)),
        );
        if let Some(time) = capture(&self.total, contents, 1) {
            set("time", Value::from(time));
        }
        set("nodes", count(capture(&self.size, contents, 1).unwrap_or(0.0)));
        set("edges", count(capture(&self.size, contents, 2).unwrap_or(0.0)));
        set("priorities", count(capture(&self.priorities, contents, 1).unwrap_or(0.0)));

        if let (Some(major), Some(minor)) = (
            capture(&self.major_minor, contents, 1),
            capture(&self.major_minor, contents, 2),
        ) {
            set("iterations", count(major + minor));
        }
        if let Some(iterations) = capture(&self.iterations, contents, 1) {
            set("iterations", count(iterations));
        }
        if let Some(promotions) = capture(&self.promotions, contents, 1) {
            set("promotions", count(promotions));
        }
        if let Some(tangles) = capture(&self.tangles, contents, 1) {
            set("tangles", count(tangles));
        }
        if let (Some(tangles), Some(iterations)) = (
            capture(&self.tangles_iterations, contents, 1),
            capture(&self.tangles_iterations, contents, 2),
        ) {
            set("tangles", count(tangles));
            set("iterations", count(iterations));
        }
        Some(record)
    }

    fn summarize(&self, metrics: &Metrics) -> String {
        match metrics.get("time") {
            Some(time) => format!("{:.6} sec", time),
            None => "verified, no time reported".to_string(),
        }
    }
}

//! Semicolon-separated export of the cached results.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::engine::ExperimentEngine;
use crate::error::Result;
use crate::experiment::{Experiment, Metrics, Status};

/// Headline metrics, in order of preference
const HEADLINE: [&str; 3] = ["iterations", "promotions", "tangles"];

/// One exported experiment result
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub group: String,
    pub dataset: String,
    pub solver: String,
    pub time: f64,
    pub done: bool,
    pub nodes: f64,
    pub edges: f64,
    pub priorities: f64,
    pub solving: f64,
    pub metric: f64,
}

impl CsvRow {
    /// Row for a finished run; `None` when the run reported no time.
    fn done(experiment: &Experiment, metrics: &Metrics) -> Option<Self> {
        let time = *metrics.get("time")?;
        let count = |key: &str| metrics.get(key).copied().unwrap_or(0.0);
        let metric = HEADLINE
            .iter()
            .find_map(|key| metrics.get(*key).copied())
            .unwrap_or(-1.0);
        Some(Self {
            group: experiment.group().to_string(),
            dataset: experiment.dataset().to_string(),
            solver: experiment.solver().to_string(),
            time,
            done: true,
            nodes: count("nodes"),
            edges: count("edges"),
            priorities: count("priorities"),
            solving: metrics.get("solving").copied().unwrap_or(time),
            metric,
        })
    }

    /// Row for a run that timed out, charged the full timeout.
    fn timeout(experiment: &Experiment, timeout_secs: u64) -> Self {
        Self {
            group: experiment.group().to_string(),
            dataset: experiment.dataset().to_string(),
            solver: experiment.solver().to_string(),
            time: timeout_secs as f64,
            done: false,
            nodes: 0.0,
            edges: 0.0,
            priorities: 0.0,
            solving: 0.0,
            metric: 0.0,
        }
    }
}

impl fmt::Display for CsvRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.done {
            return write!(
                f,
                "{}; {}; {}; {:.6}; 0; 0; 0; 0; 0; 0",
                self.group, self.dataset, self.solver, self.time
            );
        }
        write!(
            f,
            "{}; {}; {}; {:.6}; 1; {}; {}; {}; {:.6}; {}",
            self.group,
            self.dataset,
            self.solver,
            self.time,
            self.nodes,
            self.edges,
            self.priorities,
            self.solving,
            self.metric
        )
    }
}

/// Rows for every done or timed out result in the first `iterations`
/// iterations. Errors, and names no longer configured, are skipped.
pub fn csv_rows(engine: &mut ExperimentEngine, iterations: usize) -> Result<Vec<CsvRow>> {
    let by_name: HashMap<String, Arc<Experiment>> = engine
        .experiments()?
        .into_iter()
        .map(|exp| (exp.name().to_string(), exp))
        .collect();
    let timeout = engine.timeout_secs();

    let mut rows = Vec::new();
    for (iteration, slot) in engine.results().iter().take(iterations) {
        for (name, status) in slot {
            let Some(exp) = by_name.get(name) else {
                continue;
            };
            match status {
                Status::Timeout(_) => rows.push(CsvRow::timeout(exp, timeout)),
                Status::Done(metrics) => match CsvRow::done(exp, metrics) {
                    Some(row) => rows.push(row),
                    None => warn!("{}-{}: done without a time, not exported", name, iteration),
                },
                Status::Error(_) | Status::NotDone => {}
            }
        }
    }
    Ok(rows)
}

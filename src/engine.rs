//! Experiment engine: reconciles the in-memory results, the cache file and
//! the log files, and schedules whatever is still missing.
//!
//! Statuses come from the cache when possible and from the log files
//! otherwise. A cached timeout recorded below the configured timeout is never
//! trusted, since raising the timeout may let the run finish.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::iter::Sum;
use std::ops::{Add, Range};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::collection::{ExperimentCollection, ExperimentNode, ExperimentSource};
use crate::error::{BenchError, Result};
use crate::experiment::{Experiment, Status};
use crate::results::ResultsStore;
use crate::runner::{self, Interrupt};

/// Configuration of an [`ExperimentEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one log file per experiment and iteration
    pub log_dir: PathBuf,
    /// JSON file the results are cached in
    pub cache_file: PathBuf,
    /// Timeout per run, in seconds
    pub timeout_secs: u64,
    /// Pause between two consecutive runs
    pub pause: Duration,
    /// Seed for the scheduling order; OS entropy when unset
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            cache_file: PathBuf::from("cache.json"),
            timeout_secs: 1200,
            pause: Duration::from_secs(1),
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn cache_file(mut self, cache_file: impl Into<PathBuf>) -> Self {
        self.cache_file = cache_file.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub iteration: usize,
    pub name: String,
    pub status: Status,
    /// Kind-specific description of a done result
    pub summary: Option<String>,
}

impl StatusLine {
    fn new(experiment: &Experiment, iteration: usize, status: Status) -> Self {
        let summary = match &status {
            Status::Done(metrics) => Some(experiment.summarize(metrics)),
            _ => None,
        };
        Self {
            iteration,
            name: experiment.name().to_string(),
            status,
            summary,
        }
    }

    /// Returns true if the experiment produced an outcome.
    pub fn is_resolved(&self) -> bool {
        self.status != Status::NotDone
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Done(_) => write!(f, "{}: {}.", self.name, self.summary.as_deref().unwrap_or("done")),
            Status::Timeout(secs) => write!(f, "{}: timeout ({}).", self.name, secs),
            Status::Error(message) => {
                write!(f, "{}: {}.", self.name, format!("error: {}", message).bold().red())
            }
            Status::NotDone => write!(f, "{}: not done.", self.name),
        }
    }
}

/// Work left in one iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemainingWork {
    /// Experiments without any result
    pub not_done: usize,
    /// Timeouts recorded below the configured timeout
    pub stale_timeouts: usize,
}

impl Add for RemainingWork {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            not_done: self.not_done + other.not_done,
            stale_timeouts: self.stale_timeouts + other.stale_timeouts,
        }
    }
}

impl Sum for RemainingWork {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl fmt::Display for RemainingWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} experiments not done + {} experiments rerun for higher timeout.",
            self.not_done, self.stale_timeouts
        )
    }
}

/// Orchestrates a collection of experiments over repeated iterations
pub struct ExperimentEngine {
    experiments: ExperimentCollection,
    results: ResultsStore,
    config: EngineConfig,
    rng: StdRng,
}

impl fmt::Debug for ExperimentEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentEngine")
            .field("experiments", &self.experiments)
            .field("iterations", &self.results.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExperimentEngine {
    pub fn new(config: EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            experiments: ExperimentCollection::new(),
            results: ResultsStore::new(),
            config,
            rng,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timeout_secs(&self) -> u64 {
        self.config.timeout_secs
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    /// Register experiments; nothing is evaluated until first traversal.
    pub fn push(&mut self, node: impl Into<ExperimentNode>) {
        self.experiments.push(node);
    }

    pub fn push_source(&mut self, source: impl ExperimentSource + 'static) {
        self.experiments.push_source(source);
    }

    pub fn set_filter(&mut self, filter: impl Fn(&Experiment) -> bool + 'static) {
        self.experiments.set_filter(filter);
    }

    /// The experiments that pass the filter, in registration order
    pub fn experiments(&mut self) -> Result<Vec<Arc<Experiment>>> {
        self.experiments.to_vec()
    }

    /// Distinct groups, in order of first appearance
    pub fn groups(&mut self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .experiments()?
            .iter()
            .filter(|exp| seen.insert(exp.group().to_string()))
            .map(|exp| exp.group().to_string())
            .collect())
    }

    /// Log file of an experiment in an iteration: `<log_dir>/<name>-<iteration>`
    pub fn logfile(&self, experiment: &Experiment, iteration: usize) -> PathBuf {
        self.config
            .log_dir
            .join(format!("{}-{}", experiment.name(), iteration))
    }

    /// Prepare the log directory, check names, and fill the results from the
    /// cache and the log files.
    pub fn initialize(&mut self, iterations: Option<usize>, verbose: bool) -> Result<()> {
        fs::create_dir_all(&self.config.log_dir)?;
        self.sanity_check()?;
        self.fill_results(iterations, verbose)
    }

    /// Fail if two experiments share a name.
    pub fn sanity_check(&mut self) -> Result<()> {
        let experiments = self.experiments()?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut duplicates = Vec::new();
        for exp in &experiments {
            let count = counts.entry(exp.name()).or_insert(0);
            *count += 1;
            if *count == 2 {
                duplicates.push(exp.name().to_string());
            }
        }
        if duplicates.is_empty() {
            return Ok(());
        }
        error!("Sanity check failed!");
        for name in &duplicates {
            error!("{} occurs multiple times!", name);
        }
        Err(BenchError::DuplicateNames(duplicates))
    }

    /// Fill the results for up to `iterations` iterations, or until an
    /// iteration ends up without any result.
    fn fill_results(&mut self, iterations: Option<usize>, verbose: bool) -> Result<()> {
        if let Err(e) = self.load_cache(verbose, true) {
            warn!("Failed to load cache {}: {}", self.config.cache_file.display(), e);
            println!("Exception while loading cache, ignoring cache.");
            self.results.clear();
        }

        let experiments = self.experiments()?;
        for iteration in 0.. {
            if iterations.is_some_and(|max| iteration >= max) {
                break;
            }
            self.results.ensure_iteration(iteration);
            for exp in experiments.iter().filter(|exp| exp.runs_in(iteration)) {
                self.status(exp, iteration)?;
            }
            if !self.results.is_reached(iteration) {
                debug!("Iteration {} has no results, stopping fill", iteration);
                break;
            }
        }
        Ok(())
    }

    /// Status of an experiment in an iteration.
    ///
    /// Cached statuses are returned as they are, except timeouts recorded
    /// below the configured timeout, which are derived again from the log
    /// file. Derived statuses other than not-done are cached.
    pub fn status(&mut self, experiment: &Experiment, iteration: usize) -> Result<Status> {
        if let Some(cached) = self.results.get(iteration, experiment.name()) {
            if !cached.is_stale_timeout(self.config.timeout_secs) {
                return Ok(cached.clone());
            }
            debug!(
                "{}-{}: cached timeout below {}s, checking log",
                experiment.name(),
                iteration,
                self.config.timeout_secs
            );
        }
        let status = experiment.status_from_log(&self.logfile(experiment, iteration))?;
        if status != Status::NotDone {
            self.results.insert(iteration, experiment.name(), status.clone());
        }
        Ok(status)
    }

    /// Replace the results with the cache file, if there is one.
    ///
    /// With `prune`, entries for experiments no longer configured are dropped.
    pub fn load_cache(&mut self, verbose: bool, prune: bool) -> Result<()> {
        let path = self.config.cache_file.clone();
        if !path.is_file() {
            debug!("No cache at {}", path.display());
            return Ok(());
        }
        let mut store = ResultsStore::load(&path)?;
        if prune {
            let experiments = self.experiments()?;
            let names: HashSet<&str> = experiments.iter().map(|exp| exp.name()).collect();
            store.retain_names(&names);
        }
        self.results = store;
        let counts = self.results.counts();
        info!("{}", counts.describe("Loaded"));
        if verbose {
            println!("{}", counts.describe("Loaded"));
        }
        Ok(())
    }

    /// Write the results to the cache file, dropping trailing empty iterations.
    pub fn save_cache(&mut self, verbose: bool) -> Result<()> {
        self.results.save(&self.config.cache_file)?;
        let counts = self.results.counts();
        info!("{}", counts.describe("Stored"));
        if verbose {
            println!("{}", counts.describe("Stored"));
        }
        Ok(())
    }

    /// Groups (or experiment names) with work left in the first `iterations`
    /// iterations, in order of first appearance.
    pub fn todo(&mut self, by_group: bool, iterations: usize) -> Result<Vec<String>> {
        let timeout = self.config.timeout_secs;
        let mut outstanding = Vec::new();
        let mut seen = HashSet::new();
        for exp in self.experiments()? {
            let ident = if by_group { exp.group() } else { exp.name() };
            if seen.contains(ident) || !exp.should_run() {
                continue;
            }
            for iteration in (0..iterations).take_while(|i| exp.runs_in(*i)) {
                if self.status(&exp, iteration)?.is_outstanding(timeout) {
                    seen.insert(ident.to_string());
                    outstanding.push(ident.to_string());
                    break;
                }
            }
        }
        Ok(outstanding)
    }

    /// Status lines for every reached iteration, optionally for one group
    /// and ordered by group.
    pub fn report(
        &mut self,
        group: Option<&str>,
        by_group: bool,
        iterations: Option<usize>,
    ) -> Result<Vec<StatusLine>> {
        let mut experiments: Vec<_> = self
            .experiments()?
            .into_iter()
            .filter(|exp| group.is_none_or(|g| exp.group() == g))
            .collect();
        if by_group {
            experiments.sort_by(|a, b| a.group().cmp(b.group()));
        }

        let mut lines = Vec::new();
        for iteration in self.reached_iterations(iterations) {
            for exp in experiments.iter().filter(|exp| exp.runs_in(iteration)) {
                let status = self.status(exp, iteration)?;
                lines.push(StatusLine::new(exp, iteration, status));
            }
        }
        Ok(lines)
    }

    /// Delete the logs of every errored experiment, then the cache file, and
    /// reset the results. Returns the removed paths.
    pub fn clean(&mut self, iterations: Option<usize>) -> Result<Vec<PathBuf>> {
        let experiments = self.experiments()?;
        let mut removed = Vec::new();
        for iteration in self.reached_iterations(iterations) {
            for exp in experiments.iter().filter(|exp| exp.runs_in(iteration)) {
                if let Status::Error(_) = self.status(exp, iteration)? {
                    let logfile = self.logfile(exp, iteration);
                    if remove_file(&logfile)? {
                        removed.push(logfile);
                    }
                }
            }
        }
        let cache_file = self.config.cache_file.clone();
        if remove_file(&cache_file)? {
            removed.push(cache_file);
        }
        self.results.clear();
        Ok(removed)
    }

    /// Work left per iteration, for the first `iterations` iterations.
    pub fn remaining(&mut self, iterations: usize) -> Result<Vec<RemainingWork>> {
        let experiments = self.experiments()?;
        let timeout = self.config.timeout_secs;
        Ok((0..iterations)
            .map(|iteration| {
                let expected = experiments.iter().filter(|exp| exp.runs_in(iteration)).count();
                let slot = self.results.iteration(iteration);
                let recorded = slot.map_or(0, |slot| slot.len());
                let stale_timeouts = slot.map_or(0, |slot| {
                    slot.values()
                        .filter(|status| status.is_stale_timeout(timeout))
                        .count()
                });
                RemainingWork {
                    not_done: expected.saturating_sub(recorded),
                    stale_timeouts,
                }
            })
            .collect())
    }

    /// Run everything that is not settled yet, iteration by iteration, for
    /// one group or all of them. Without an iteration bound this never
    /// returns on its own. SIGINT aborts the run with an interrupt error,
    /// whether it arrives during an experiment or during the pause between two.
    ///
    /// Groups and the experiments within a group are visited in random order.
    /// Settledness is read from the log files, not the cache. Results are
    /// kept in memory only; call [`save_cache`](Self::save_cache) to persist.
    pub async fn run(&mut self, group: Option<&str>, iterations: Option<usize>) -> Result<()> {
        let mut interrupt = runner::interrupt_listener()?;
        self.run_until(group, iterations, &mut interrupt).await
    }

    /// [`run`](Self::run) with an explicit interrupt source.
    pub async fn run_until<I: Interrupt>(
        &mut self,
        group: Option<&str>,
        iterations: Option<usize>,
        interrupt: &mut I,
    ) -> Result<()> {
        let experiments = self.experiments()?;
        let timeout = self.config.timeout_secs;
        let mut first_run = true;

        for iteration in 0.. {
            if iterations.is_some_and(|max| iteration >= max) {
                break;
            }
            self.results.ensure_iteration(iteration);

            let mut groups = match group {
                Some(g) => vec![g.to_string()],
                None => self.groups()?,
            };
            groups.shuffle(&mut self.rng);

            for g in &groups {
                println!("Running experiments in group {}.", g.cyan());
                let mut members: Vec<&Arc<Experiment>> =
                    experiments.iter().filter(|exp| exp.group() == g).collect();
                members.shuffle(&mut self.rng);

                for exp in members {
                    if !exp.runs_in(iteration) {
                        continue;
                    }
                    let logfile = self.logfile(exp, iteration);
                    if exp.status_from_log(&logfile)?.is_settled(timeout) || !exp.should_run() {
                        continue;
                    }
                    let pause = if first_run { Duration::ZERO } else { self.config.pause };
                    first_run = false;
                    tokio::select! {
                        biased;
                        _ = interrupt.received() => {
                            println!("Interrupted.");
                            warn!("Run interrupted before {}", exp.name());
                            return Err(BenchError::InterruptedBetweenRuns {
                                next: exp.name().to_string(),
                            });
                        }
                        _ = tokio::time::sleep(pause) => {}
                    }

                    let status = runner::run_experiment(exp, timeout, &logfile, interrupt).await?;
                    if status != Status::NotDone {
                        self.results.insert(iteration, exp.name(), status);
                    }
                }
            }
            println!("{}", format!("Iteration {} done.", iteration).green());
            info!("Iteration {} done", iteration);
        }
        Ok(())
    }

    /// Iterations from 0 up to the bound, stopping at the first one without results
    fn reached_iterations(&self, iterations: Option<usize>) -> Range<usize> {
        let reached = (0..self.results.len())
            .take_while(|i| self.results.is_reached(*i))
            .count();
        0..iterations.map_or(reached, |max| reached.min(max))
    }
}

fn remove_file(path: &Path) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    fs::remove_file(path)?;
    println!("removed: {}", path.display());
    info!("Removed {}", path.display());
    Ok(true)
}

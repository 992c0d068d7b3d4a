//! Parity game solver benchmarks.
//!
//! Every input file of a dataset directory becomes one group, holding one
//! experiment per selected solver.

pub mod finder;
pub mod oink;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;

use crate::collection::{ExperimentNode, ExperimentSource};
use crate::error::{BenchError, Result};
use crate::experiment::{Experiment, ExperimentBuilder};

pub use finder::{FileFinder, InputFile};
pub use oink::OinkLog;

/// Extensions of the input files, plain and compressed
pub const DEFAULT_EXTENSIONS: [&str; 6] = ["pg", "pg.bz2", "pg.gz", "gm", "gm.bz2", "gm.gz"];

/// Solving algorithm selected on the solver command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Solver {
    Fpi,
    Fpj,
    Tl,
    Rtl,
    Ortl,
    Npp,
    Zlk,
}

impl Solver {
    pub const ALL: [Solver; 7] = [
        Solver::Fpi,
        Solver::Fpj,
        Solver::Tl,
        Solver::Rtl,
        Solver::Ortl,
        Solver::Npp,
        Solver::Zlk,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Solver::Fpi => "fpi",
            Solver::Fpj => "fpj",
            Solver::Tl => "tl",
            Solver::Rtl => "rtl",
            Solver::Ortl => "ortl",
            Solver::Npp => "npp",
            Solver::Zlk => "zlk",
        }
    }

    /// Extra solver arguments; the parallel solvers are pinned to one worker.
    fn extra_args(&self) -> &'static [&'static str] {
        match self {
            Solver::Fpi | Solver::Fpj | Solver::Zlk => &["-w", "1"],
            _ => &[],
        }
    }

    /// Select this solver: suffixes the name, replaces the solver label and
    /// appends the selecting arguments.
    pub fn apply(&self, builder: ExperimentBuilder) -> ExperimentBuilder {
        builder
            .name_suffix(&format!("-{}", self.label()))
            .solver(self.label())
            .arg(format!("--{}", self.label()))
            .args(self.extra_args().iter().copied())
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Solver {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        Solver::ALL
            .into_iter()
            .find(|solver| solver.label() == s.trim().to_lowercase())
            .ok_or_else(|| BenchError::Source(format!("unknown solver: {}", s)))
    }
}

/// Solver option that adds a suffix to the name and the solver label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Compress,
    Inflate,
    Scc,
    /// Disable the special-case preprocessing
    NoSpecial,
}

impl Toggle {
    fn suffix(&self) -> &'static str {
        match self {
            Toggle::Compress => "-c",
            Toggle::Inflate => "-i",
            Toggle::Scc => "-s",
            Toggle::NoSpecial => "-n",
        }
    }

    fn args(&self) -> &'static [&'static str] {
        match self {
            Toggle::Compress => &["--compress"],
            Toggle::Inflate => &["--inflate"],
            Toggle::Scc => &["--scc"],
            Toggle::NoSpecial => &["--no-loops", "--no-single", "--no-wcwc"],
        }
    }

    pub fn apply(&self, builder: ExperimentBuilder) -> ExperimentBuilder {
        builder
            .name_suffix(self.suffix())
            .solver_suffix(self.suffix())
            .args(self.args().iter().copied())
    }
}

/// One dataset directory run against a set of solvers
#[derive(Debug)]
pub struct OinkSuite {
    binary: PathBuf,
    dataset: String,
    finder: FileFinder,
    solvers: Vec<Solver>,
    env: BTreeMap<String, String>,
    kind: Arc<OinkLog>,
}

impl OinkSuite {
    /// Suite over `<inputs_dir>/<dataset>` with every solver.
    pub fn new(binary: impl Into<PathBuf>, inputs_dir: impl Into<PathBuf>, dataset: &str) -> Result<Self> {
        let directory = inputs_dir.into().join(dataset);
        Ok(Self {
            binary: binary.into(),
            dataset: dataset.to_string(),
            finder: FileFinder::new(directory, DEFAULT_EXTENSIONS),
            solvers: Solver::ALL.to_vec(),
            env: BTreeMap::new(),
            kind: Arc::new(OinkLog::new()?),
        })
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.finder = FileFinder::new(self.finder.directory().to_path_buf(), extensions);
        self
    }

    /// Restrict the solvers; an empty list keeps all of them.
    pub fn solvers(mut self, solvers: Vec<Solver>) -> Self {
        if !solvers.is_empty() {
            self.solvers = solvers;
        }
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn base(&self, input: &InputFile) -> ExperimentBuilder {
        let mut builder = Experiment::builder(input.name.as_str(), self.kind.clone())
            .group(input.name.as_str())
            .dataset(self.dataset.as_str())
            .command([
                self.binary.to_string_lossy().into_owned(),
                input.path.to_string_lossy().into_owned(),
                "-v".to_string(),
            ]);
        for (key, value) in &self.env {
            builder = builder.env(key.as_str(), value.as_str());
        }
        builder
    }

    /// The experiments of one input file
    pub fn group_for(&self, input: &InputFile) -> Vec<Experiment> {
        self.solvers
            .iter()
            .map(|solver| Toggle::NoSpecial.apply(solver.apply(self.base(input))).build())
            .collect()
    }
}

impl ExperimentSource for OinkSuite {
    fn expand(mut self: Box<Self>) -> Result<Vec<ExperimentNode>> {
        let inputs = self.finder.files()?.to_vec();
        debug!("Dataset {}: {} inputs", self.dataset, inputs.len());
        Ok(inputs
            .iter()
            .map(|input| ExperimentNode::from(self.group_for(input)))
            .collect())
    }
}

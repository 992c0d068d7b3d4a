use benchlab::engine::EngineConfig;
use benchlab::suite::{DEFAULT_EXTENSIONS, Solver};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_dir: PathBuf,
    pub cache_file: PathBuf,
    pub timeout_secs: u64,
    pub iterations: usize,
    pub pause_ms: u64,
    pub seed: Option<u64>,
    pub suite: SuiteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub binary: PathBuf,
    pub inputs_dir: PathBuf,
    pub datasets: Vec<String>,
    /// Solver labels to run; empty means all of them
    pub solvers: Vec<String>,
    pub extensions: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tools/oink"),
            inputs_dir: PathBuf::from("inputs"),
            datasets: vec![
                "synt".to_string(),
                "modelchecking".to_string(),
                "equivchecking".to_string(),
            ],
            solvers: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

impl SuiteConfig {
    pub fn solvers(&self) -> Result<Vec<Solver>> {
        self.solvers
            .iter()
            .map(|label| label.parse::<Solver>().context("Invalid solver in config"))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            cache_file: PathBuf::from("cache.json"),
            timeout_secs: 300,
            iterations: 5,
            pause_ms: 1000,
            seed: None,
            suite: SuiteConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new()
            .log_dir(&self.log_dir)
            .cache_file(&self.cache_file)
            .timeout_secs(self.timeout_secs)
            .pause(Duration::from_millis(self.pause_ms));
        if let Some(seed) = self.seed {
            engine = engine.seed(seed);
        }
        engine
    }
}

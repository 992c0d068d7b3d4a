//! Error types for benchlab
//!
//! Centralized error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

/// All error types that can occur while orchestrating experiments
#[derive(Debug, Error)]
pub enum BenchError {
    /// Two or more experiments share a name; names key the cache and the log files
    #[error("Duplicate experiment names: {}", .0.join(", "))]
    DuplicateNames(Vec<String>),

    /// A log file could not be decoded as UTF-8
    #[error("Log file is not valid UTF-8: {}", path.display())]
    Decode { path: PathBuf },

    /// The experiment command could not be started (typically a missing executable)
    #[error("Failed to start experiment {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The scheduling run was interrupted while an experiment was in flight
    #[error("Interrupted while running {name}, partial output kept at {}", preserved.display())]
    Interrupted { name: String, preserved: PathBuf },

    /// The scheduling run was interrupted with no experiment in flight
    #[error("Interrupted before running {next}")]
    InterruptedBetweenRuns { next: String },

    /// An experiment source failed to expand
    #[error("Experiment source error: {0}")]
    Source(String),

    /// The cache file holds data that does not fit the results layout
    #[error("Cache error: {0}")]
    Cache(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regular expression in a log parser
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Result type alias for benchlab operations
pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_error() {
        let err = BenchError::DuplicateNames(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "Duplicate experiment names: a, b");
    }

    #[test]
    fn test_decode_error() {
        let err = BenchError::Decode {
            path: PathBuf::from("logs/x-0"),
        };
        assert_eq!(err.to_string(), "Log file is not valid UTF-8: logs/x-0");
    }

    #[test]
    fn test_spawn_error() {
        let err = BenchError::Spawn {
            name: "game-zlk".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().starts_with("Failed to start experiment game-zlk"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_interrupted_error() {
        let err = BenchError::Interrupted {
            name: "game-tl".to_string(),
            preserved: PathBuf::from("logs/game-tl-0.interrupted"),
        };
        assert!(err.to_string().contains("logs/game-tl-0.interrupted"));
    }

    #[test]
    fn test_interrupted_between_runs_error() {
        let err = BenchError::InterruptedBetweenRuns {
            next: "game-npp".to_string(),
        };
        assert_eq!(err.to_string(), "Interrupted before running game-npp");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BenchError = io_err.into();
        assert!(matches!(err, BenchError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: BenchError = json_err.into();
        assert!(matches!(err, BenchError::Json(_)));
    }
}

//! Discover input files in a directory by extension.

use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, warn};

use crate::error::{BenchError, Result};

/// One discovered input: its name without extension, and its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub path: PathBuf,
}

/// Lists the files of a directory ending in one of the extensions.
///
/// The directory is read on the first call to [`files`](Self::files) only.
#[derive(Debug, Clone)]
pub struct FileFinder {
    directory: PathBuf,
    extensions: Vec<String>,
    files: Option<Vec<InputFile>>,
}

impl FileFinder {
    pub fn new<I, S>(directory: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directory: directory.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            files: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Matching files, grouped by extension in the configured order and
    /// sorted by path within an extension.
    pub fn files(&mut self) -> Result<&[InputFile]> {
        let files = match self.files.take() {
            Some(files) => files,
            None => self.scan()?,
        };
        Ok(self.files.insert(files).as_slice())
    }

    fn scan(&self) -> Result<Vec<InputFile>> {
        if !self.directory.is_dir() {
            warn!("Input directory {} does not exist", self.directory.display());
            return Ok(Vec::new());
        }
        let base = Pattern::escape(&self.directory.to_string_lossy());
        let mut found = Vec::new();
        for ext in &self.extensions {
            let dotted = format!(".{}", ext);
            let pattern = format!("{}/*{}", base, Pattern::escape(&dotted));
            let paths = glob::glob(&pattern).map_err(|e| BenchError::Source(e.to_string()))?;
            for entry in paths {
                let path = entry.map_err(|e| BenchError::Io(e.into_error()))?;
                if !path.is_file() {
                    continue;
                }
                let Some(name) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(dotted.as_str()))
                else {
                    continue;
                };
                found.push(InputFile {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }
        debug!("Found {} inputs in {}", found.len(), self.directory.display());
        Ok(found)
    }
}

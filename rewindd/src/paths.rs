//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathsError {
    #[error("could not determine the {0} directory")]
    NoBaseDir(&'static str),
    #[error("failed to create {path:?}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, PathsError> {
        let data_dir = dirs::data_dir()
            .ok_or(PathsError::NoBaseDir("data"))?
            .join("rewind");
        let config_dir = dirs::config_dir()
            .ok_or(PathsError::NoBaseDir("config"))?
            .join("rewind");
        Self::at(data_dir, config_dir)
    }

    /// Explicit locations; the data directory is created if missing.
    pub fn at(data_dir: PathBuf, config_dir: PathBuf) -> Result<Self, PathsError> {
        fs::create_dir_all(&data_dir).map_err(|source| PathsError::Create {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self {
            data_dir,
            config_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Default settings file; it may not exist.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn report_file(&self) -> PathBuf {
        self.data_dir.join("report.json")
    }
}

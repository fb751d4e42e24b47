//! Runner settings, loaded from JSON.
//!
//! Every field has a default, so a settings file only needs the keys it
//! changes, e.g. `{ "max_episodes": 200, "session": { "test_level": 4 } }`.

use std::fs;
use std::path::{Path, PathBuf};

use rewind::agent::Mode;
use rewind::config::{ConfigError, SessionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings JSON in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(#[from] ConfigError),
    #[error("tick_ms must be at least 1")]
    ZeroTick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub session: SessionConfig,
    pub seed: u64,
    pub mode: Mode,
    /// Delay between ticks.
    pub tick_ms: u64,
    /// Honor the rewind pause and win/loss delays; off runs flat out.
    pub paced: bool,
    /// Stop after this many finished episodes.
    pub max_episodes: Option<u32>,
    /// Stop once this level has been cleared.
    pub max_level: Option<u32>,
    /// An episode running longer than this is abandoned and retried.
    pub max_steps_per_episode: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            seed: 0,
            mode: Mode::Training,
            tick_ms: 30,
            paced: true,
            max_episodes: None,
            max_level: None,
            max_steps_per_episode: 5_000,
        }
    }
}

impl RunnerSettings {
    pub fn from_json(path: &Path, text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &text)
    }

    /// Like [`RunnerSettings::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.session.validate()?;
        if self.tick_ms == 0 {
            return Err(SettingsError::ZeroTick);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let s = RunnerSettings::from_json(
            Path::new("inline.json"),
            r#"{ "max_episodes": 12, "mode": "Inference", "session": { "test_level": 4 } }"#,
        )
        .expect("valid settings");
        assert_eq!(s.max_episodes, Some(12));
        assert_eq!(s.mode, Mode::Inference);
        assert_eq!(s.session.test_level, 4);
        assert_eq!(s.session.failure_limits, vec![5, 4, 3, 2, 1]);
        assert_eq!(s.tick_ms, 30);
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = RunnerSettings::from_json(Path::new("x.json"), r#"{ "tick_ms": 0 }"#);
        assert!(matches!(err, Err(SettingsError::ZeroTick)));

        let err = RunnerSettings::from_json(
            Path::new("x.json"),
            r#"{ "session": { "sim": { "step_penalty": 3 } } }"#,
        );
        assert!(matches!(err, Err(SettingsError::Invalid(ConfigError::NotAPenalty(_)))));

        let err = RunnerSettings::from_json(Path::new("x.json"), "{ nope");
        assert!(matches!(err, Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn missing_default_file_is_fine() {
        let path = std::env::temp_dir().join("rewindd-no-such-settings.json");
        let s = RunnerSettings::load_or_default(&path).expect("defaults");
        assert_eq!(s, RunnerSettings::default());
        assert!(matches!(RunnerSettings::load(&path), Err(SettingsError::Read { .. })));
    }
}

// config.rs — Session configuration
//
// Optional JSON file tuning how a session evaluates queries. Every field has
// a default, so an empty object (or no file at all) is a valid config.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`jobs` must be at least 1")]
    ZeroJobs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Check files in parallel on the rayon pool.
    pub parallel: bool,
    /// Worker threads; the rayon default when unset.
    pub jobs: Option<usize>,
    /// Evict least-recently-verified memos down to this many after each edit.
    pub cache_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: None,
            cache_capacity: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        if config.jobs == Some(0) {
            return Err(ConfigError::ZeroJobs);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(SessionConfig::from_json_str("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = SessionConfig::from_json_str(r#"{"parallel": false, "cache_capacity": 64}"#).unwrap();
        assert!(!config.parallel);
        assert_eq!(config.cache_capacity, Some(64));
        assert_eq!(config.jobs, None);
    }

    #[test]
    fn unknown_fields_and_zero_jobs_are_rejected() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"paralel": true}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"jobs": 0}"#),
            Err(ConfigError::ZeroJobs)
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SessionConfig::load(Path::new("/nonexistent/emc.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_BASE_URL: &str = "SHEET_SYNC_BASE_URL";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "SHEET_SYNC_FETCH_TIMEOUT_SECS";
pub const ENV_SESSION_ID: &str = "SHEET_SYNC_SESSION_ID";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid base URL {0}")]
    InvalidUrl(String),
}

/// Client settings for the upload/chat and document fetch services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Ceiling on a single document fetch
    pub fetch_timeout_secs: u64,
    /// Ceiling on upload and chat requests; chat waits on the agent
    pub request_timeout_secs: u64,
    pub session_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            fetch_timeout_secs: 30,
            request_timeout_secs: 120,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl ClientConfig {
    /// `$CONFIG_DIR/sheet-sync/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sheet-sync").join("config.json"))
    }

    /// Defaults, then the config file, then environment overrides.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides looked up by environment variable name
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }

        if let Some(value) = lookup(ENV_FETCH_TIMEOUT_SECS) {
            self.fetch_timeout_secs = value
                .trim()
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_FETCH_TIMEOUT_SECS,
                    value,
                })?;
        }

        if let Some(session_id) = lookup(ENV_SESSION_ID) {
            self.session_id = session_id;
        }

        Ok(self)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        Ok(url)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert!(uuid::Uuid::parse_str(&config.session_id).is_ok());
        assert_ne!(config.session_id, ClientConfig::default().session_id);
    }

    #[test]
    fn test_file_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"base_url": "http://agent.internal:9000", "session_id": "s-1"}}"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "http://agent.internal:9000");
        assert_eq!(config.session_id, "s-1");
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.request_timeout_secs, 120);
    }

    #[test]
    fn test_bad_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            ClientConfig::load(Some(Path::new("/nonexistent/sheet-sync.json"))),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BASE_URL, "http://127.0.0.1:8123"),
            (ENV_FETCH_TIMEOUT_SECS, "5"),
            (ENV_SESSION_ID, "fixed"),
        ]);

        let config = ClientConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url, "http://127.0.0.1:8123");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.session_id, "fixed");
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let err = ClientConfig::default()
            .with_overrides(|key| (key == ENV_FETCH_TIMEOUT_SECS).then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let config = ClientConfig {
            base_url: "mailto:someone@example.com".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.base_url().is_err());
    }
}

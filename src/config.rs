//! Client configuration.
//!
//! Read from `<config dir>/chatsync/config.toml` when that file exists;
//! every field falls back to a default suitable for a local backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::history::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the REST API.
    pub backend_url: String,
    /// Websocket URL of the push transport.
    pub socket_url: String,
    pub page_size: usize,
    pub request_timeout_secs: u64,
    /// Author id used for outgoing messages.
    pub user_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            socket_url: "ws://localhost:5000/ws".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: 15,
            user_id: None,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("chatsync")
            .join("config.toml")
    }

    /// Loads `path`, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config.normalized())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn normalized(mut self) -> Self {
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse("backend_url = \"https://chat.example\"\npage_size = 20\n").unwrap();
        assert_eq!(config.backend_url, "https://chat.example");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.socket_url, Config::default().socket_url);
        assert_eq!(config.request_timeout_secs, Config::default().request_timeout_secs);
    }

    #[test]
    fn zero_page_size_falls_back() {
        let config = Config::parse("page_size = 0").unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/chatsync/config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(Config::parse("page_size = \"lots\"").is_err());
    }
}

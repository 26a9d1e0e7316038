use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
const API_URL_ENV: &str = "PROPDESK_API_URL";
const TOKEN_FILE_ENV: &str = "PROPDESK_TOKEN_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_base_url: String,
    /// Where the last issued auth token is persisted.
    #[serde(default = "default_token_file")]
    pub token_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_url(),
            token_file: default_token_file(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_token_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("auth_token"))
}

/// `<platform config dir>/propdesk`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("propdesk"))
}

impl Config {
    /// Defaults, then `config.toml` in the config dir, then environment.
    pub fn load() -> Result<Self, ApiError> {
        let file = config_dir().map(|dir| dir.join("config.toml"));
        let mut config = match file {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("Failed to read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&contents)
            .map_err(|e| ApiError::Config(format!("Invalid config {}: {e}", path.display())))?;
        config.normalize();
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(path) = var(TOKEN_FILE_ENV).filter(|v| !v.is_empty()) {
            self.token_file = Some(PathBuf::from(path));
        }
    }

    fn normalize(&mut self) {
        let trimmed = self.api_base_url.trim().trim_end_matches('/');
        self.api_base_url = trimmed.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:3001/api");
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_base_url = \"https://api.example.com/v1/\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com/v1");
        assert_eq!(config.token_file, default_token_file());
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_base_url = [").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ApiError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROPDESK_API_URL", "http://10.0.0.2:4000/api/"),
            ("PROPDESK_TOKEN_FILE", "/tmp/tok"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| (*v).to_string()));
        config.normalize();
        assert_eq!(config.api_base_url, "http://10.0.0.2:4000/api");
        assert_eq!(config.token_file, Some(PathBuf::from("/tmp/tok")));
    }

    #[test]
    fn test_empty_env_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config, Config::default());
    }
}

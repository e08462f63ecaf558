use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::CometxError;

pub const DEFAULT_SERVER: &str = "https://www.comet.com";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub url_override: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub api_key: Option<String>,
    pub server_url: String,
    pub workspace: Option<String>,
    pub user: Option<String>,
}

impl ResolvedConfig {
    pub fn require_api_key(&self) -> Result<&str, CometxError> {
        self.api_key.as_deref().ok_or(CometxError::MissingApiKey)
    }

    pub fn workspace_or(&self, explicit: Option<&str>) -> Result<String, CometxError> {
        explicit
            .or(self.workspace.as_deref())
            .map(str::to_string)
            .ok_or(CometxError::MissingWorkspace)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CometxError> {
        let file = Self::load_file(path)?;
        Ok(Self::resolve_config(file, |name| std::env::var(name).ok()))
    }

    pub fn load_file(path: Option<&str>) -> Result<Config, CometxError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Config::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CometxError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| CometxError::ConfigParse(err.to_string()))
    }

    pub fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from("cometx.json");
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new().map(|dirs| dirs.config_dir().join("cometx").join("config.json"))
    }

    pub fn resolve_config<F>(config: Config, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |name: &str, fallback: Option<String>| {
            env(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or(fallback)
        };

        let url_override = pick("COMET_URL_OVERRIDE", config.url_override);
        ResolvedConfig {
            api_key: pick("COMET_API_KEY", config.api_key),
            server_url: url_override
                .as_deref()
                .map(server_root)
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            workspace: pick("COMET_WORKSPACE", config.workspace),
            user: pick("COMET_USER", config.user),
        }
    }
}

fn server_root(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/clientlib")
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_file() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            url_override: None,
            workspace: Some("file-ws".to_string()),
            user: None,
        };
        let resolved = ConfigLoader::resolve_config(config, |name| match name {
            "COMET_API_KEY" => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(resolved.api_key.as_deref(), Some("from-env"));
        assert_eq!(resolved.workspace.as_deref(), Some("file-ws"));
        assert_eq!(resolved.server_url, DEFAULT_SERVER);
    }

    #[test]
    fn url_override_drops_clientlib() {
        let resolved = ConfigLoader::resolve_config(Config::default(), |name| {
            (name == "COMET_URL_OVERRIDE")
                .then(|| "https://comet.example.com/clientlib/".to_string())
        });
        assert_eq!(resolved.server_url, "https://comet.example.com");
    }
}

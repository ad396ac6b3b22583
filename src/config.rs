//! Configuration loading for vee (TOML).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();
static CONFIG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
static OVERRIDE_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub path: Option<PathBuf>,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {}", path.display(), self.reason)
        } else {
            write!(f, "{}", self.reason)
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub pypi: PypiConfig,
    #[serde(default)]
    pub python: PythonConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HomeConfig {
    /// Home root holding packages, builds, installs, opt, environments.
    /// Defaults to `~/.vee` (overridable by `VEE` in the environment).
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PypiConfig {
    /// Index base URL; metadata is fetched from `{index_url}/pypi/{name}/json`.
    pub index_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PythonConfig {
    /// Interpreter used to drive setup scripts.
    pub interpreter: Option<String>,
}

pub fn init(override_path: Option<PathBuf>) -> Result<&'static Config, ConfigError> {
    let _ = OVERRIDE_PATH.set(override_path);
    load_config()
}

pub fn get() -> Result<&'static Config, ConfigError> {
    if CONFIG.get().is_some() {
        return Ok(CONFIG.get().unwrap());
    }
    load_config()
}

pub fn config_path() -> Option<&'static Path> {
    CONFIG_PATH
        .get()
        .and_then(|p| p.as_ref().map(|p| p.as_path()))
}

fn load_config() -> Result<&'static Config, ConfigError> {
    let override_path = OVERRIDE_PATH.get().and_then(|p| p.clone());
    let path = resolve_config_path(override_path.as_ref())?;
    let config = match &path {
        Some(p) => load_from_path(p)?,
        None => Config::default(),
    };

    let _ = CONFIG_PATH.set(path);
    let _ = CONFIG.set(config);
    Ok(CONFIG.get().unwrap())
}

fn resolve_config_path(override_path: Option<&PathBuf>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = override_path {
        return ensure_exists(path).map(Some);
    }

    if let Ok(raw) = std::env::var("VEE_CONFIG") {
        let path = PathBuf::from(raw);
        return ensure_exists(&path).map(Some);
    }

    if let Some(home) = dirs::home_dir() {
        let candidate = home.join(".vee").join("vee.toml");
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

fn ensure_exists(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        Ok(path.to_path_buf())
    } else {
        Err(ConfigError {
            path: Some(path.to_path_buf()),
            reason: "config file not found".to_string(),
        })
    }
}

fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError {
        path: Some(path.to_path_buf()),
        reason: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError {
        path: Some(path.to_path_buf()),
        reason: e.to_string(),
    })
}

/// Index base URL, configured or the public default.
pub fn pypi_index_url(config: &Config) -> String {
    config
        .pypi
        .index_url
        .clone()
        .unwrap_or_else(|| "https://pypi.org".to_string())
}

/// Interpreter used for setup scripts, configured or `python`.
pub fn python_interpreter(config: &Config) -> String {
    config
        .python
        .interpreter
        .clone()
        .unwrap_or_else(|| "python".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [home]
            path = "/var/vee"
            [pypi]
            index_url = "https://mirror.example.com"
            [python]
            interpreter = "python3"
            "#,
        )
        .unwrap();
        assert_eq!(config.home.path.as_deref(), Some(Path::new("/var/vee")));
        assert_eq!(pypi_index_url(&config), "https://mirror.example.com");
        assert_eq!(python_interpreter(&config), "python3");
    }

    #[test]
    fn defaults_when_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.home.path.is_none());
        assert_eq!(pypi_index_url(&config), "https://pypi.org");
        assert_eq!(python_interpreter(&config), "python");
    }
}

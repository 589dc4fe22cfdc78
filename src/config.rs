//! Configuration loading.
//!
//! Sources, in ascending precedence: built-in defaults, a YAML file
//! (`stackwatch.yaml`/`config.yaml` in the working directory or under
//! `~/.config/stackwatch/`, overridable via `STACKWATCH_CONFIG`), then
//! `STACKWATCH_*` environment variables.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub scan: ScanConfig,
    pub protection: ProtectionConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "unix:///var/run/docker.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub paths: Vec<PathBuf>,
    /// Extra directory names to skip; empty means the built-in exclusion set.
    pub exclude: Vec<String>,
    pub interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("~/projects"), PathBuf::from("~/dev")],
            exclude: Vec::new(),
            interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub patterns: Vec<String>,
    pub projects: Vec<String>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["*cloudflare*".to_string(), "*tunnel*".to_string()],
            projects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.config/stackwatch/preferences.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Loads configuration from file (if any) and applies environment overrides
/// and `~` expansion.
pub fn load() -> Result<Config> {
    let path = std::env::var_os("STACKWATCH_CONFIG")
        .map(PathBuf::from)
        .or_else(find_config_file);

    let mut config = match path {
        Some(path) => {
            log::debug!("loading config from {}", path.display());
            serde_yaml::from_str(&std::fs::read_to_string(path)?)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    config.scan.paths = config.scan.paths.iter().map(|p| expand_home(p)).collect();
    config.protection.projects = config
        .protection
        .projects
        .iter()
        .map(|p| expand_home(Path::new(p)).to_string_lossy().into_owned())
        .collect();
    config.store.path = expand_home(&config.store.path);

    Ok(config)
}

fn find_config_file() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("stackwatch.yaml"), PathBuf::from("config.yaml")];
    if let Some(home) = std::env::var_os("HOME") {
        let config_dir = PathBuf::from(home).join(".config/stackwatch");
        candidates.push(config_dir.join("stackwatch.yaml"));
        candidates.push(config_dir.join("config.yaml"));
    }
    candidates.into_iter().find(|p| p.is_file())
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("STACKWATCH_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("STACKWATCH_PORT").and_then(|p| p.parse().ok()) {
        config.server.port = port;
    }
    if let Some(socket) = lookup("STACKWATCH_DOCKER_SOCKET") {
        config.docker.socket = socket;
    }
    if let Some(paths) = lookup("STACKWATCH_SCAN_PATHS") {
        config.scan.paths = paths.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect();
    }
    if let Some(interval) = lookup("STACKWATCH_SCAN_INTERVAL").and_then(|i| i.parse().ok()) {
        config.scan.interval_secs = interval;
    }
    if let Some(level) = lookup("STACKWATCH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(path) = lookup("STACKWATCH_STORE_PATH") {
        config.store.path = PathBuf::from(path);
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

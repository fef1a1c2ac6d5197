use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub moonlight_port: u16,
    pub roms_path: PathBuf,
    pub saves_path: PathBuf,
    pub config_path: PathBuf,
    pub server_name: String,
    pub admin_email: String,
    pub interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub rom_extensions: Vec<String>,
    pub services: Vec<ServiceConfig>,
    pub notify: NotifyConfig,
}

/// One monitored unit. `critical` units must all be active for the host to
/// be reported healthy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub server: String,
    pub topic: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            moonlight_port: 47984,
            roms_path: PathBuf::from("/opt/coinops/roms"),
            saves_path: PathBuf::from("/opt/coinops/saves"),
            config_path: PathBuf::from("/home/gameuser/.config"),
            server_name: "game-server".to_string(),
            admin_email: "admin@localhost".to_string(),
            interval_secs: default_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            rom_extensions: default_rom_extensions(),
            services: default_services(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            server: "https://ntfy.sh".to_string(),
            topic: "game-server-standalone".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid value '{value}' in environment variable {name}")]
    Env { name: &'static str, value: String },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    /// Defaults, then the optional YAML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("COINOPS_PORT") {
            self.port = parse_env("COINOPS_PORT", &v)?;
        }
        if let Some(v) = get("COINOPS_HOST") {
            self.host = v;
        }
        if let Some(v) = get("MOONLIGHT_PORT") {
            self.moonlight_port = parse_env("MOONLIGHT_PORT", &v)?;
        }
        if let Some(v) = get("ROMS_PATH") {
            self.roms_path = PathBuf::from(v);
        }
        if let Some(v) = get("SAVES_PATH") {
            self.saves_path = PathBuf::from(v);
        }
        if let Some(v) = get("CONFIG_PATH") {
            self.config_path = PathBuf::from(v);
        }
        if let Some(v) = get("SERVER_NAME") {
            self.server_name = v;
        }
        if let Some(v) = get("ADMIN_EMAIL") {
            self.admin_email = v;
        }
        if let Some(v) = get("NTFY_SERVER") {
            self.notify.server = v;
        }
        if let Some(v) = get("NTFY_TOPIC_GAMESERVER") {
            self.notify.topic = v;
        }
        if let Some(v) = get("SAMPLE_INTERVAL_SECS") {
            self.interval_secs = parse_env("SAMPLE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = parse_env("PROBE_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host is required".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "port must be in range 1..65535".to_string(),
            ));
        }
        let host = self.bind_host();
        if host.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "host '{}' must not contain whitespace",
                self.host
            )));
        }
        if host.contains(':') && host.parse::<Ipv6Addr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "host '{}' is not a valid IPv6 address",
                self.host
            )));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.probe_timeout_ms < 1 {
            return Err(ConfigError::Validation(
                "probe_timeout_ms must be >= 1".to_string(),
            ));
        }

        validate_services(&self.services)?;
        validate_rom_extensions(&self.rom_extensions)?;

        Ok(())
    }

    /// Host as handed to the resolver: an IP literal or a hostname, without
    /// IPv6 brackets.
    pub fn bind_host(&self) -> &str {
        let host = self.host.trim();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// `host:port` for logs, IPv6 literals bracketed.
    pub fn listen_display(&self) -> String {
        let host = self.bind_host();
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn critical_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.critical)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl NotifyConfig {
    pub fn is_enabled(&self) -> bool {
        !self.server.trim().is_empty() && !self.topic.trim().is_empty()
    }
}

fn parse_env<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Env {
        name,
        value: value.to_string(),
    })
}

fn validate_services(services: &[ServiceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for service in services {
        if service.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(service.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "service name '{}' must be unique",
                service.name
            )));
        }
    }
    Ok(())
}

fn validate_rom_extensions(extensions: &[String]) -> Result<(), ConfigError> {
    for ext in extensions {
        if ext.trim().is_empty() {
            return Err(ConfigError::Validation(
                "rom_extensions must not contain empty entries".to_string(),
            ));
        }
        if ext.starts_with('.') {
            return Err(ConfigError::Validation(format!(
                "rom extension '{}' must be given without the leading dot",
                ext
            )));
        }
    }
    Ok(())
}

const fn default_interval_secs() -> u64 {
    15
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_rom_extensions() -> Vec<String> {
    ["zip", "7z", "iso"].iter().map(|s| s.to_string()).collect()
}

fn default_services() -> Vec<ServiceConfig> {
    [
        ("sunshine", "Sunshine GameStream", true),
        ("coinops-web", "CoinOps Web Interface", false),
        ("x11-server", "X11 Display Server", false),
        ("openbox", "Openbox Window Manager", false),
    ]
    .into_iter()
    .map(|(name, display_name, critical)| ServiceConfig {
        name: name.to_string(),
        display_name: display_name.to_string(),
        critical,
    })
    .collect()
}

//! Configuration for the Mimic client and server
//!
//! Both sides load a YAML document. A missing file falls back to
//! defaults with a warning; a malformed file is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::constants::{DEFAULT_SWITCH_MAX, DEFAULT_SWITCH_MIN};

/// Client configuration (`config.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address, host:port
    #[serde(default = "default_server_addr")]
    pub server: String,
    /// Session identifier; generated when absent
    #[serde(default)]
    pub uuid: String,
    /// Ordered list of fronting domains to rotate through
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
    #[serde(default)]
    pub settings: ClientSettings,
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Switch interval range, e.g. "60s-300s"
    #[serde(default)]
    pub switch_time: Option<String>,
    /// Reserved
    #[serde(default)]
    pub randomize: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server_addr(),
            uuid: String::new(),
            domains: default_domains(),
            settings: ClientSettings::default(),
            log_level: default_log_level(),
        }
    }
}

/// Server configuration (`server.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional YAML map of domain -> preset name
    #[serde(default)]
    pub domains_file: Option<PathBuf>,
    /// Optional directory of custom preset files
    #[serde(default)]
    pub presets_dir: Option<PathBuf>,
    /// Maximum concurrent sessions
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Accepted connections per second; 0 disables the limiter
    #[serde(default)]
    pub rate_limit: u32,
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default)]
    pub log_file_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            domains_file: None,
            presets_dir: None,
            max_clients: default_max_clients(),
            rate_limit: 0,
            log_level: default_log_level(),
            log_to_file: false,
            log_file_path: None,
        }
    }
}

fn default_server_addr() -> String {
    "localhost:8080".to_string()
}

fn default_domains() -> Vec<String> {
    vec![
        "vk.com".to_string(),
        "rutube.ru".to_string(),
        "telegram.org".to_string(),
    ]
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_max_clients() -> usize {
    100
}

impl ClientConfig {
    /// Load from a YAML file. A missing file yields the demo default
    /// configuration with a warning; parse and validation errors
    /// propagate. A missing `uuid` is filled with a fresh v4 value.
    pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut config = match fs::read_to_string(&path).await {
            Ok(contents) => serde_yaml::from_str::<Self>(&contents)
                .map_err(|e| anyhow!("failed to parse client config: {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "config file not found at '{}', using default configuration",
                    path.as_ref().display()
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow!(
                    "failed to read config file '{}': {e}",
                    path.as_ref().display()
                ))
            }
        };

        if config.uuid.trim().is_empty() {
            config.uuid = Uuid::new_v4().to_string();
            warn!("no session uuid configured, generated {}", config.uuid);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.trim().is_empty() {
            bail!("server address must not be empty");
        }
        if self.domains.is_empty() {
            bail!("at least one domain is required");
        }
        for domain in &self.domains {
            if domain.trim().is_empty() {
                bail!("domains must not be empty");
            }
            if domain.contains('|') {
                bail!("domain '{domain}' contains the handshake separator '|'");
            }
        }
        if self.uuid.contains('|') {
            bail!("session uuid contains the handshake separator '|'");
        }
        validate_log_level(&self.log_level)?;
        Ok(())
    }

    /// Parsed switch interval range. Absent or malformed values fall
    /// back to the documented 60s-300s defaults.
    pub fn switch_range(&self) -> (Duration, Duration) {
        match self.settings.switch_time.as_deref() {
            None => (DEFAULT_SWITCH_MIN, DEFAULT_SWITCH_MAX),
            Some(raw) => match parse_switch_range(raw) {
                Ok(range) => range,
                Err(err) => {
                    warn!("invalid switch_time '{raw}' ({err}), using 60s-300s");
                    (DEFAULT_SWITCH_MIN, DEFAULT_SWITCH_MAX)
                }
            },
        }
    }
}

impl ServerConfig {
    /// Load from a YAML file, then apply the CLI port override. A
    /// missing file yields defaults with a warning.
    pub async fn load<P: AsRef<Path>>(path: P, cli_port: u16) -> anyhow::Result<Self> {
        let mut config = match fs::read_to_string(&path).await {
            Ok(contents) => serde_yaml::from_str::<Self>(&contents)
                .map_err(|e| anyhow!("failed to parse server config: {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "config file not found at '{}', using default configuration",
                    path.as_ref().display()
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow!(
                    "failed to read config file '{}': {e}",
                    path.as_ref().display()
                ))
            }
        };

        // an explicitly passed --port wins over the file
        if cli_port != default_port() {
            config.port = cli_port;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            bail!("server port must be between 1 and 65535");
        }
        if self.max_clients == 0 {
            bail!("max_clients must be greater than 0");
        }
        validate_log_level(&self.log_level)?;
        Ok(())
    }
}

fn validate_log_level(level: &str) -> anyhow::Result<()> {
    const VALID: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
    if !VALID.contains(&level.to_uppercase().as_str()) {
        bail!("invalid log level: {level}");
    }
    Ok(())
}

/// Parse a `"<min>-<max>"` switch interval range with suffix units
/// (`ms`, `s`, `m`, `h`), e.g. `"60s-300s"` or `"1m-5m"`.
pub fn parse_switch_range(raw: &str) -> anyhow::Result<(Duration, Duration)> {
    let (lo, hi) = raw
        .split_once('-')
        .context("expected \"<min>-<max>\", e.g. \"60s-300s\"")?;
    let min = parse_duration_token(lo.trim())?;
    let max = parse_duration_token(hi.trim())?;
    if min.is_zero() {
        bail!("switch interval must be positive");
    }
    if min > max {
        bail!("switch interval minimum exceeds maximum");
    }
    Ok((min, max))
}

fn parse_duration_token(token: &str) -> anyhow::Result<Duration> {
    let (value, unit): (&str, fn(u64) -> Duration) = if let Some(v) = token.strip_suffix("ms") {
        (v, Duration::from_millis)
    } else if let Some(v) = token.strip_suffix('s') {
        (v, Duration::from_secs)
    } else if let Some(v) = token.strip_suffix('m') {
        (v, |n| Duration::from_secs(n * 60))
    } else if let Some(v) = token.strip_suffix('h') {
        (v, |n| Duration::from_secs(n * 3600))
    } else {
        bail!("duration '{token}' is missing a unit suffix (ms/s/m/h)");
    };

    let n: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid duration value '{token}'"))?;
    Ok(unit(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switch_range_seconds() {
        assert_eq!(
            parse_switch_range("60s-300s").unwrap(),
            (Duration::from_secs(60), Duration::from_secs(300))
        );
    }

    #[test]
    fn test_parse_switch_range_mixed_units() {
        assert_eq!(
            parse_switch_range("1m-2h").unwrap(),
            (Duration::from_secs(60), Duration::from_secs(7200))
        );
        assert_eq!(
            parse_switch_range("500ms-2s").unwrap(),
            (Duration::from_millis(500), Duration::from_secs(2))
        );
    }

    #[test]
    fn test_parse_switch_range_rejects_garbage() {
        assert!(parse_switch_range("60s").is_err());
        assert!(parse_switch_range("fast-slow").is_err());
        assert!(parse_switch_range("60-300").is_err());
        assert!(parse_switch_range("300s-60s").is_err());
        assert!(parse_switch_range("0s-10s").is_err());
    }

    #[test]
    fn test_switch_range_falls_back_to_defaults() {
        let mut config = ClientConfig::default();
        assert_eq!(
            config.switch_range(),
            (Duration::from_secs(60), Duration::from_secs(300))
        );

        config.settings.switch_time = Some("not-a-range".to_string());
        assert_eq!(
            config.switch_range(),
            (Duration::from_secs(60), Duration::from_secs(300))
        );

        config.settings.switch_time = Some("10s-30s".to_string());
        assert_eq!(
            config.switch_range(),
            (Duration::from_secs(10), Duration::from_secs(30))
        );
    }

    #[test]
    fn test_client_config_yaml() {
        let yaml = "\
server: \"127.0.0.1:8443\"
uuid: \"abc-123\"
domains:
  - vk.com
  - youtube.com
settings:
  switch_time: \"30s-90s\"
  randomize: true
";
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server, "127.0.0.1:8443");
        assert_eq!(config.uuid, "abc-123");
        assert_eq!(config.domains, vec!["vk.com", "youtube.com"]);
        assert!(config.settings.randomize);
        assert_eq!(
            config.switch_range(),
            (Duration::from_secs(30), Duration::from_secs(90))
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_client_config_rejects_separator_in_domain() {
        let config = ClientConfig {
            domains: vec!["vk.com|evil".to_string()],
            uuid: "abc".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config_rejects_empty_domains() {
        let config = ClientConfig {
            domains: Vec::new(),
            uuid: "abc".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_yaml_and_defaults() {
        let yaml = "\
port: 8443
max_clients: 32
rate_limit: 10
";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 8443);
        assert_eq!(config.max_clients, 32);
        assert_eq!(config.rate_limit, 10);
        assert_eq!(config.log_level, "INFO");
        config.validate().unwrap();

        let defaults = ServerConfig::default();
        assert_eq!(defaults.port, 443);
        assert_eq!(defaults.max_clients, 100);
        assert_eq!(defaults.rate_limit, 0);
    }

    #[test]
    fn test_server_config_rejects_zero_port() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

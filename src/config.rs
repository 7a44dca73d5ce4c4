//! Startup configuration.
//!
//! The prefix list normally arrives as the agent options string (the text
//! after `=` in `-agentpath:libcoverage_agent.so=com.acme,org.shop`). Everything
//! else is read from `COVERAGE_AGENT_*` environment variables with defaults,
//! or from a TOML file when the CLI is given `--config`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `COVERAGE_AGENT_PREFIXES` | (none) | Prefix list used when the options string is empty |
//! | `COVERAGE_AGENT_CONTROL_PORT` | (none) | Enables the control channel on this port |
//! | `COVERAGE_AGENT_CONTROL_HOST` | 127.0.0.1 | Control channel bind address |
//! | `COVERAGE_AGENT_MAX_CONNECTIONS` | 4 | Max concurrent control connections |
//! | `COVERAGE_AGENT_FRAME_LIMIT` | 65536 | Max control frame size (bytes) |
//! | `COVERAGE_AGENT_EXCLUDE` | (none) | Extra comma-separated excluded prefixes |
//! | `COVERAGE_AGENT_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `COVERAGE_AGENT_LOG_FORMAT` | json | `json` or `pretty` |
//! | `COVERAGE_AGENT_LOG_FILE` | (none) | Log file path, stderr when unset |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{ConnectionConfig, ControlServerConfig};
use crate::telemetry::{LogConfig, LogFormat};

const DEFAULT_FRAME_LIMIT: usize = 64 * 1024;
const MIN_FRAME_LIMIT: usize = 1024;
const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Configuration errors. Fatal at startup, reported back on the control channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no usable prefix: specify at least one non-empty prefix, e.g. 'com.yourapplication'")]
    NoPrefixes,

    #[error("invalid control port: {0}")]
    InvalidPort(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("config file error: {0}")]
    File(String),
}

/// All agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Raw, unvalidated prefix list.
    pub prefixes: String,
    /// Control channel settings. `None` keeps the startup prefix set for the process lifetime.
    pub control: Option<ControlServerConfig>,
    pub connections: ConnectionConfig,
    /// Extra excluded prefixes on top of the built-in list.
    pub exclusions: Vec<String>,
    pub log: LogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prefixes: String::new(),
            control: None,
            connections: ConnectionConfig {
                max_connections: DEFAULT_MAX_CONNECTIONS,
            },
            exclusions: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

/// Serializable summary of the effective values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub prefixes: String,
    pub control_addr: Option<String>,
    pub max_connections: usize,
    pub frame_limit: Option<usize>,
    pub exclusions: Vec<String>,
    pub log_level: String,
    pub log_format: String,
}

impl AgentConfig {
    /// Config with the given prefixes and everything else defaulted.
    pub fn with_prefixes(prefixes: impl Into<String>) -> Self {
        Self {
            prefixes: prefixes.into(),
            ..Default::default()
        }
    }

    pub fn effective(&self) -> EffectiveConfig {
        EffectiveConfig {
            prefixes: self.prefixes.clone(),
            control_addr: self.control.as_ref().map(|c| c.bind.to_string()),
            max_connections: self.connections.max_connections,
            frame_limit: self.control.as_ref().map(|c| c.max_frame_size),
            exclusions: self.exclusions.clone(),
            log_level: self.log.level.clone(),
            log_format: match self.log.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
        }
    }

    /// Load a TOML config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML config content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::File(e.to_string()))?;
        file.into_agent_config()
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse an optional port. Present-but-invalid is an error rather than a silent fallback.
fn parse_port(key: &str) -> Result<Option<u16>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => val
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidPort(val)),
        Err(_) => Ok(None),
    }
}

fn parse_host(key: &str) -> Result<IpAddr, ConfigError> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => {
            val.trim().parse::<IpAddr>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: val,
            })
        }
        _ => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load log configuration from environment.
fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    let level = std::env::var("COVERAGE_AGENT_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(defaults.level);
    let format = match std::env::var("COVERAGE_AGENT_LOG_FORMAT") {
        Ok(val) => LogFormat::parse(&val).unwrap_or(defaults.format),
        Err(_) => defaults.format,
    };
    let output_path = std::env::var("COVERAGE_AGENT_LOG_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    LogConfig {
        format,
        level,
        output_path,
    }
}

fn frame_limit(value: usize) -> usize {
    value.max(MIN_FRAME_LIMIT)
}

/// Load configuration from the agent options string and the environment.
///
/// Non-empty `options` win over `COVERAGE_AGENT_PREFIXES`. Prefix validity is
/// not checked here; the bootstrap rejects an unusable list.
pub fn load(options: &str) -> Result<AgentConfig, ConfigError> {
    let prefixes = if options.trim().is_empty() {
        std::env::var("COVERAGE_AGENT_PREFIXES").unwrap_or_default()
    } else {
        options.to_string()
    };

    let max_connections = parse_usize("COVERAGE_AGENT_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
    let max_frame_size = parse_usize("COVERAGE_AGENT_FRAME_LIMIT", DEFAULT_FRAME_LIMIT);

    let control = match parse_port("COVERAGE_AGENT_CONTROL_PORT")? {
        Some(port) => {
            let host = parse_host("COVERAGE_AGENT_CONTROL_HOST")?;
            Some(ControlServerConfig {
                bind: SocketAddr::new(host, port),
                max_frame_size: frame_limit(max_frame_size),
            })
        }
        None => None,
    };

    let exclusions = std::env::var("COVERAGE_AGENT_EXCLUDE")
        .map(|v| split_list(&v))
        .unwrap_or_default();

    Ok(AgentConfig {
        prefixes,
        control,
        connections: ConnectionConfig {
            max_connections: max_connections.max(1),
        },
        exclusions,
        log: load_log_config(),
    })
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct FileConfig {
    prefixes: String,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    control: Option<FileControlConfig>,
    #[serde(default)]
    log: Option<FileLogConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct FileControlConfig {
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_frame_limit")]
    frame_limit: usize,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct FileLogConfig {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_frame_limit() -> usize {
    DEFAULT_FRAME_LIMIT
}

impl FileConfig {
    fn into_agent_config(self) -> Result<AgentConfig, ConfigError> {
        let mut config = AgentConfig::with_prefixes(self.prefixes);
        config.exclusions = self
            .exclude
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if let Some(control) = self.control {
            let host = control
                .host
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "control.host".to_string(),
                    value: control.host.clone(),
                })?;
            config.control = Some(ControlServerConfig {
                bind: SocketAddr::new(host, control.port),
                max_frame_size: frame_limit(control.frame_limit),
            });
            config.connections.max_connections = control.max_connections.max(1);
        }

        if let Some(log) = self.log {
            if let Some(level) = log.level {
                config.log.level = level;
            }
            if let Some(format) = log.format {
                config.log.format =
                    LogFormat::parse(&format).ok_or_else(|| ConfigError::InvalidValue {
                        key: "log.format".to_string(),
                        value: format.clone(),
                    })?;
            }
            config.log.output_path = log.file;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "COVERAGE_AGENT_PREFIXES",
        "COVERAGE_AGENT_CONTROL_PORT",
        "COVERAGE_AGENT_CONTROL_HOST",
        "COVERAGE_AGENT_MAX_CONNECTIONS",
        "COVERAGE_AGENT_FRAME_LIMIT",
        "COVERAGE_AGENT_EXCLUDE",
        "COVERAGE_AGENT_LOG_LEVEL",
        "COVERAGE_AGENT_LOG_FORMAT",
        "COVERAGE_AGENT_LOG_FILE",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load("com.acme").unwrap();
        assert_eq!(cfg.prefixes, "com.acme");
        assert!(cfg.control.is_none());
        assert_eq!(cfg.connections.max_connections, 4);
        assert!(cfg.exclusions.is_empty());
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_options_take_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("COVERAGE_AGENT_PREFIXES", "org.env");
        assert_eq!(load("com.opts").unwrap().prefixes, "com.opts");
        assert_eq!(load("  ").unwrap().prefixes, "org.env");
        clear_env_vars();
    }

    #[test]
    fn test_control_port_enables_channel() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("COVERAGE_AGENT_CONTROL_PORT", "9123");
        std::env::set_var("COVERAGE_AGENT_FRAME_LIMIT", "10");
        let cfg = load("com.acme").unwrap();
        let control = cfg.control.expect("control channel configured");
        assert_eq!(control.bind.port(), 9123);
        assert!(control.bind.ip().is_loopback());
        assert!(control.max_frame_size >= 1024, "frame limit must have floor");
        clear_env_vars();
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("COVERAGE_AGENT_CONTROL_PORT", "not_a_port");
        assert!(matches!(load("com.acme"), Err(ConfigError::InvalidPort(_))));
        clear_env_vars();
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("COVERAGE_AGENT_MAX_CONNECTIONS", "abc");
        std::env::set_var("COVERAGE_AGENT_LOG_FORMAT", "xml");
        let cfg = load("com.acme").unwrap();
        assert_eq!(cfg.connections.max_connections, 4);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_exclusions_are_split_and_trimmed() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("COVERAGE_AGENT_EXCLUDE", " com.acme.gen. , ,org.lib. ");
        let cfg = load("com.acme").unwrap();
        assert_eq!(cfg.exclusions, vec!["com.acme.gen.", "org.lib."]);
        clear_env_vars();
    }

    #[test]
    fn test_toml_config() {
        let cfg = AgentConfig::from_toml(
            r#"
prefixes = "com.acme, org.shop"
exclude = ["com.acme.generated."]

[control]
port = 9100
max-connections = 2

[log]
level = "debug"
format = "pretty"
"#,
        )
        .unwrap();
        assert_eq!(cfg.prefixes, "com.acme, org.shop");
        assert_eq!(cfg.exclusions, vec!["com.acme.generated."]);
        assert_eq!(cfg.control.as_ref().unwrap().bind.port(), 9100);
        assert_eq!(cfg.connections.max_connections, 2);
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        let result = AgentConfig::from_toml("prefixes = \"a\"\nbogus = 1\n");
        assert!(matches!(result, Err(ConfigError::File(_))));
    }

    #[test]
    fn test_effective_config() {
        let mut cfg = AgentConfig::with_prefixes("com.acme");
        cfg.control = Some(ControlServerConfig {
            bind: "127.0.0.1:9000".parse().unwrap(),
            max_frame_size: 2048,
        });
        let eff = cfg.effective();
        assert_eq!(eff.control_addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(eff.frame_limit, Some(2048));
        assert_eq!(eff.log_format, "json");
    }
}

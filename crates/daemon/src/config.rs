//! Configuration management for the Termgate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termgate/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address for the WebSocket transport.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7681";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{engine}.max_sessions must be between 1 and 1000, got {value}")]
    InvalidMaxSessions { engine: &'static str, value: usize },

    #[error("exec_timeout_secs must be between 1 and 3600 seconds, got {0}")]
    InvalidExecTimeout(u64),

    #[error("max_output_bytes must be greater than 0, got {0}")]
    InvalidMaxOutput(usize),

    #[error("workspace.allowed_roots must list at least one directory")]
    NoAllowedRoots,

    #[error("invalid command name in {list}: {name:?}")]
    InvalidCommandName { list: &'static str, name: String },

    #[error("listen address is not a valid socket address: {0}")]
    InvalidListenAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Commands refused by default when no allowlist is configured.
const DEFAULT_DENYLIST: &[&str] = &[
    "rm", "rmdir", "mv", "dd", "mkfs", "shred", "chmod", "chown", "sudo", "su", "doas",
    "shutdown", "reboot", "halt", "poweroff", "kill", "killall", "pkill", "sh", "bash", "zsh",
    "fish", "dash", "eval", "exec", "env", "nohup", "xargs", "nc", "ncat", "curl", "wget",
    "ssh", "scp", "find", "awk", "gawk", "python", "python3", "perl", "ruby", "node", "php",
    "lua",
];

/// Main configuration structure for the Termgate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Transport configuration.
    pub server: ServerConfig,

    /// Authorized filesystem roots.
    pub workspace: WorkspaceConfig,

    /// Sandboxed command engine configuration.
    pub sandbox: SandboxConfig,

    /// Interactive agent engine configuration.
    pub agent: AgentConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket server listens on.
    pub listen: String,
}

/// Authorized roots consulted by the path validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directories (and their descendants) sessions may work in.
    pub allowed_roots: Vec<PathBuf>,
}

/// Sandboxed command engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum number of concurrent sandbox sessions.
    pub max_sessions: usize,

    /// Allowed commands mapped to a display title. Non-empty means only
    /// these commands may run.
    pub allowlist: BTreeMap<String, String>,

    /// Commands refused when no allowlist is configured.
    pub denylist: Vec<String>,

    /// Wall-clock limit for one external command, in seconds.
    pub exec_timeout_secs: u64,

    /// Output budget for one external command, in bytes.
    pub max_output_bytes: usize,
}

/// Interactive agent engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of concurrent agent sessions.
    pub max_sessions: usize,

    /// Explicit executable override. Used when it resolves to an executable file.
    pub executable: Option<PathBuf>,

    /// Well-known user-local install location, tried after the override.
    pub install_path: PathBuf,

    /// Environment variable name prefixes removed before spawning.
    pub strip_env_prefixes: Vec<String>,

    /// Switch appended in plan mode.
    pub plan_flag: String,

    /// Switch appended in auto mode.
    pub auto_flag: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            allowed_roots: dirs::home_dir().into_iter().collect(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            allowlist: BTreeMap::new(),
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            exec_timeout_secs: 30,
            max_output_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            executable: None,
            install_path: default_install_path(),
            strip_env_prefixes: vec!["TERMGATE_".to_string()],
            plan_flag: "--plan".to_string(),
            auto_flag: "--auto".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termgate")
        .join("config.toml")
}

/// Returns the well-known user-local install location of the agent program.
fn default_install_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("bin")
        .join("agent")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMGATE_LOG_LEVEL: Override log level
    /// - TERMGATE_LISTEN: Override the WebSocket listen address
    /// - TERMGATE_AGENT_BIN: Override the agent executable path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TERMGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(listen) = std::env::var("TERMGATE_LISTEN") {
            if !listen.is_empty() {
                tracing::info!("Overriding listen address from environment: {}", listen);
                self.server.listen = listen;
            }
        }

        if let Ok(bin) = std::env::var("TERMGATE_AGENT_BIN") {
            if !bin.is_empty() {
                tracing::info!("Overriding agent executable from environment: {}", bin);
                self.agent.executable = Some(PathBuf::from(bin));
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.sandbox.max_sessions) {
            return Err(ConfigError::InvalidMaxSessions {
                engine: "sandbox",
                value: self.sandbox.max_sessions,
            });
        }
        if !(1..=1000).contains(&self.agent.max_sessions) {
            return Err(ConfigError::InvalidMaxSessions {
                engine: "agent",
                value: self.agent.max_sessions,
            });
        }

        if !(1..=3600).contains(&self.sandbox.exec_timeout_secs) {
            return Err(ConfigError::InvalidExecTimeout(self.sandbox.exec_timeout_secs));
        }

        if self.sandbox.max_output_bytes == 0 {
            return Err(ConfigError::InvalidMaxOutput(self.sandbox.max_output_bytes));
        }

        if self.workspace.allowed_roots.is_empty() {
            return Err(ConfigError::NoAllowedRoots);
        }

        for name in self.sandbox.allowlist.keys() {
            if !is_valid_command_name(name) {
                return Err(ConfigError::InvalidCommandName {
                    list: "allowlist",
                    name: name.clone(),
                });
            }
        }
        for name in &self.sandbox.denylist {
            if !is_valid_command_name(name) {
                return Err(ConfigError::InvalidCommandName {
                    list: "denylist",
                    name: name.clone(),
                });
            }
        }

        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.server.listen.clone()));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// A command name must be a bare word: no path separators, no whitespace.
fn is_valid_command_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

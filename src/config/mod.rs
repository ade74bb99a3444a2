use crate::mcp::validate::SERVERS_KEY;
use crate::mcp::{ConfigError, GroupConfig, validate};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project-local server file, merged over the settings' `mcp_servers`.
pub const LOCAL_SERVERS_FILE: &str = ".mcp.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pass the parent environment through to servers. Default: true.
    pub include_system_env: bool,

    /// Bound on each server's readiness handshake. Default: 30.
    pub startup_timeout_secs: u64,

    /// Wait after closing a server's stdin before killing it. Default: 5000.
    pub shutdown_grace_ms: u64,

    /// Servers declared inline, same shape as the JSON `mcpServers` value.
    pub mcp_servers: toml::Table,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include_system_env: true,
            startup_timeout_secs: 30,
            shutdown_grace_ms: 5000,
            mcp_servers: toml::Table::new(),
        }
    }
}

/// Path to the user settings file.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("mcp-fleet").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".mcp-fleet/config.toml"))
}

impl Settings {
    /// Load the user settings file, or defaults if it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&settings_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Apply lifecycle settings to a validated config.
    #[must_use]
    pub fn apply(&self, config: GroupConfig) -> GroupConfig {
        config
            .with_ambient_environment(self.include_system_env)
            .with_startup_timeout(self.startup_timeout())
            .with_shutdown_grace(self.shutdown_grace())
    }

    /// Collect servers from the settings table and `<dir>/.mcp.json`.
    ///
    /// Entries in `.mcp.json` replace settings entries of the same name. The
    /// merged document goes through the same validation as any other source.
    pub fn discover_servers(&self, dir: &Path) -> Result<GroupConfig, ConfigError> {
        let mut servers = Map::new();
        if let Value::Object(inline) = serde_json::to_value(&self.mcp_servers)? {
            servers.extend(inline);
        }

        let local_path = dir.join(LOCAL_SERVERS_FILE);
        if local_path.exists() {
            let content =
                std::fs::read_to_string(&local_path).map_err(|source| ConfigError::Io {
                    path: local_path.clone(),
                    source,
                })?;
            let local: Value = serde_json::from_str(&content)?;
            let entries = match local.as_object().and_then(|root| root.get(SERVERS_KEY)) {
                Some(Value::Object(entries)) => entries,
                Some(_) => return Err(ConfigError::ServersNotAMapping),
                None => return Err(ConfigError::MissingServers),
            };
            servers.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut root = Map::new();
        root.insert(SERVERS_KEY.to_string(), Value::Object(servers));
        validate(&Value::Object(root)).map(|config| self.apply(config))
    }

    /// Read an explicit JSON config file and apply lifecycle settings.
    pub fn servers_from_file(&self, path: &Path) -> Result<GroupConfig, ConfigError> {
        validate::from_file(path).map(|config| self.apply(config))
    }
}

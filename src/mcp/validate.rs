//! Validation of the declarative `mcpServers` document.
//!
//! Validation is all-or-nothing: the first malformed entry rejects the whole
//! document, and nothing is spawned.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::spec::{GroupConfig, ProcessSpec};

/// Top-level key holding the server collection.
pub const SERVERS_KEY: &str = "mcpServers";

/// Validate a raw document into a [`GroupConfig`] with default lifecycle settings.
pub fn validate(raw: &Value) -> Result<GroupConfig, ConfigError> {
    let servers = raw
        .as_object()
        .and_then(|root| root.get(SERVERS_KEY))
        .ok_or(ConfigError::MissingServers)?;
    let servers = servers.as_object().ok_or(ConfigError::ServersNotAMapping)?;
    if servers.is_empty() {
        return Err(ConfigError::NoServers);
    }

    let mut config = GroupConfig::new();
    for (name, entry) in servers {
        config.push(parse_entry(name, entry)?)?;
    }
    Ok(config)
}

/// Parse and validate a JSON document.
pub fn from_str(content: &str) -> Result<GroupConfig, ConfigError> {
    let raw: Value = serde_json::from_str(content)?;
    validate(&raw)
}

/// Read, parse and validate a JSON config file. A leading `~` is expanded.
pub fn from_file(path: impl AsRef<Path>) -> Result<GroupConfig, ConfigError> {
    let path = expand_home(path.as_ref());
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    from_str(&content)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    }
}

fn parse_entry(name: &str, entry: &Value) -> Result<ProcessSpec, ConfigError> {
    let entry = entry
        .as_object()
        .ok_or_else(|| ConfigError::EntryNotAMapping(name.to_string()))?;

    let command = entry
        .get("command")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCommand(name.to_string()))?;

    Ok(ProcessSpec {
        name: name.to_string(),
        command: command.to_string(),
        args: parse_args(name, entry)?,
        env: parse_env(name, entry)?,
    })
}

fn parse_args(name: &str, entry: &Map<String, Value>) -> Result<Vec<String>, ConfigError> {
    let invalid = || ConfigError::InvalidField {
        server: name.to_string(),
        field: "args",
        expected: "a list of strings",
    };
    match entry.get("args") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

fn parse_env(name: &str, entry: &Map<String, Value>) -> Result<HashMap<String, String>, ConfigError> {
    let invalid = || ConfigError::InvalidField {
        server: name.to_string(),
        field: "env",
        expected: "a mapping of strings",
    };
    match entry.get("env") {
        None | Some(Value::Null) => Ok(HashMap::new()),
        Some(Value::Object(vars)) => vars
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|v| (k.clone(), v.to_string()))
                    .ok_or_else(invalid)
            })
            .collect(),
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_validate_full_entry() {
        let raw = json!({
            "mcpServers": {
                "prometheus": {
                    "command": "prometheus-mcp-server",
                    "args": ["--stdio"],
                    "env": {"PROMETHEUS_URL": "http://localhost:9090"}
                }
            }
        });
        let config = validate(&raw).unwrap();
        let spec = config.get("prometheus").unwrap();
        assert_eq!(spec.command, "prometheus-mcp-server");
        assert_eq!(spec.args, vec!["--stdio"]);
        assert_eq!(spec.env["PROMETHEUS_URL"], "http://localhost:9090");
    }

    #[test]
    fn test_validate_defaults_args_and_env() {
        let raw = json!({"mcpServers": {"time": {"command": "python"}}});
        let config = validate(&raw).unwrap();
        let spec = config.get("time").unwrap();
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
        assert!(config.include_ambient_environment);
    }

    #[test]
    fn test_validate_preserves_declaration_order() {
        let raw = json!({
            "mcpServers": {
                "kubernetes": {"command": "npx"},
                "prometheus": {"command": "prometheus-mcp-server"},
                "time": {"command": "python"}
            }
        });
        let config = validate(&raw).unwrap();
        let names: Vec<_> = config.names().collect();
        assert_eq!(names, vec!["kubernetes", "prometheus", "time"]);
    }

    #[test]
    fn test_missing_servers_key() {
        let err = validate(&json!({"servers": {}})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingServers));
        let err = validate(&json!(["not", "a", "mapping"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingServers));
    }

    #[test]
    fn test_servers_not_a_mapping() {
        let err = validate(&json!({"mcpServers": ["npx"]})).unwrap_err();
        assert!(matches!(err, ConfigError::ServersNotAMapping));
    }

    #[test]
    fn test_empty_servers_rejected() {
        let err = validate(&json!({"mcpServers": {}})).unwrap_err();
        assert!(matches!(err, ConfigError::NoServers));
    }

    #[test]
    fn test_missing_command_names_entry() {
        let raw = json!({
            "mcpServers": {
                "ok": {"command": "npx"},
                "broken": {"args": ["x"]}
            }
        });
        let err = validate(&raw).unwrap_err();
        assert!(matches!(&err, ConfigError::MissingCommand(n) if n == "broken"));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = validate(&json!({"mcpServers": {"x": {"command": ""}}})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCommand(_)));
    }

    #[test]
    fn test_entry_not_a_mapping() {
        let err = validate(&json!({"mcpServers": {"x": "npx"}})).unwrap_err();
        assert!(matches!(err, ConfigError::EntryNotAMapping(n) if n == "x"));
    }

    #[test]
    fn test_invalid_args_and_env_types() {
        let err = validate(&json!({"mcpServers": {"x": {"command": "a", "args": "b"}}}))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "args", .. }));

        let err = validate(&json!({"mcpServers": {"x": {"command": "a", "env": {"K": 1}}}}))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "env", .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mcpServers": {{"time": {{"command": "python", "args": ["-m", "mcp_server_time"]}}}}}}"#).unwrap();
        let config = from_file(file.path()).unwrap();
        assert_eq!(config.get("time").unwrap().args, vec!["-m", "mcp_server_time"]);
    }

    #[test]
    fn test_from_file_missing() {
        let err = from_file("/nonexistent/mcp-fleet/mcp.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_str_bad_json() {
        let err = from_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Malformed server configuration. Raised before any process is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config must be a mapping with key 'mcpServers'")]
    MissingServers,

    #[error("'mcpServers' must map names to server specs")]
    ServersNotAMapping,

    #[error("'mcpServers' is empty; at least one server is required")]
    NoServers,

    #[error("server '{0}': spec must be a mapping")]
    EntryNotAMapping(String),

    #[error("server '{0}': missing or empty 'command'")]
    MissingCommand(String),

    #[error("server '{server}': field '{field}' must be {expected}")]
    InvalidField {
        server: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("server '{0}' is declared more than once")]
    DuplicateServer(String),

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure to bring a single server to `Running`.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Executable '{command}' for '{name}' not found on PATH")]
    ExecutableNotFound { name: String, command: String },

    #[error("Server '{name}' failed to start: {cause}")]
    StartupFailed { name: String, cause: String },
}

impl SpawnError {
    pub fn startup(name: impl Into<String>, cause: impl ToString) -> Self {
        Self::StartupFailed {
            name: name.into(),
            cause: cause.to_string(),
        }
    }

    /// Name of the server that failed.
    #[must_use]
    pub fn server(&self) -> &str {
        match self {
            Self::ExecutableNotFound { name, .. } | Self::StartupFailed { name, .. } => name,
        }
    }
}

/// Errors surfaced by the process group.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The first spawn failure during `enter`, raised after rollback.
    #[error("Server group failed to start: {0}")]
    Startup(#[source] SpawnError),

    #[error("server '{name}' not found; available: {available:?}")]
    ServerNotFound {
        name: String,
        available: Vec<String>,
    },
}

/// A single handle's release failure. Collected during teardown, logged, never raised.
#[derive(Debug, Clone, Error)]
#[error("Failed to shut down '{name}': {cause}")]
pub struct TeardownFailure {
    pub name: String,
    pub cause: String,
}

/// Errors on a server's communication endpoint.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Disconnected")]
    Disconnected,
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_not_found_lists_available() {
        let err = GroupError::ServerNotFound {
            name: "missing".into(),
            available: vec!["kubernetes".into(), "time".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("kubernetes"));
        assert!(msg.contains("time"));
    }

    #[test]
    fn test_spawn_error_server_name() {
        let err = SpawnError::startup("prometheus", "handshake timed out");
        assert_eq!(err.server(), "prometheus");
        assert!(err.to_string().contains("handshake timed out"));
    }
}

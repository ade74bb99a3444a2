use thiserror::Error;

use crate::mcp::{ConfigError, GroupError, McpError, SpawnError, TeardownFailure};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Group(GroupError),

    #[error(transparent)]
    Teardown(#[from] TeardownFailure),

    #[error("Mcp error: {0}")]
    Mcp(#[from] McpError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GroupError> for Error {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::Config(e) => Self::Config(e),
            other => Self::Group(other),
        }
    }
}

impl Error {
    /// Stable name of the failure class, for callers that render errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigInvalid",
            Self::Spawn(SpawnError::ExecutableNotFound { .. }) => "ExecutableNotFound",
            Self::Spawn(SpawnError::StartupFailed { .. }) => "StartupFailed",
            Self::Group(GroupError::Startup(_)) => "GroupStartupError",
            Self::Group(GroupError::ServerNotFound { .. }) => "ServerNotFound",
            Self::Group(GroupError::Config(_)) => "ConfigInvalid",
            Self::Teardown(_) => "TeardownFailure",
            Self::Mcp(_) => "McpError",
            Self::Settings(_) => "SettingsInvalid",
            Self::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err: Error = GroupError::Config(ConfigError::MissingServers).into();
        assert_eq!(err.kind(), "ConfigInvalid");

        let err: Error = GroupError::Startup(SpawnError::startup("time", "exited")).into();
        assert_eq!(err.kind(), "GroupStartupError");
        assert!(err.to_string().contains("time"));

        let err: Error = GroupError::ServerNotFound {
            name: "x".into(),
            available: vec![],
        }
        .into();
        assert_eq!(err.kind(), "ServerNotFound");

        let err: Error = SpawnError::ExecutableNotFound {
            name: "k8s".into(),
            command: "npx".into(),
        }
        .into();
        assert_eq!(err.kind(), "ExecutableNotFound");
        assert_eq!(err.to_string(), "Executable 'npx' for 'k8s' not found on PATH");
    }
}

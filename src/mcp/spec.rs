use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::ConfigError;

/// Default bound on a single server's readiness handshake.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period between the graceful close and a forced kill.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One declared server: how to launch it and under which logical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Validated set of servers to run as one group.
///
/// Specs keep declaration order; teardown runs in the reverse of it.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    specs: Vec<ProcessSpec>,
    /// Inherit the parent's environment before applying per-server overrides.
    pub include_ambient_environment: bool,
    /// Bound on each server's launch + readiness handshake.
    pub startup_timeout: Duration,
    /// Per-server wait after the graceful close before force-killing.
    pub shutdown_grace: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            specs: Vec::new(),
            include_ambient_environment: true,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl GroupConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a server, rejecting empty commands and duplicate names.
    pub fn with_server(mut self, spec: ProcessSpec) -> Result<Self, ConfigError> {
        self.push(spec)?;
        Ok(self)
    }

    pub(crate) fn push(&mut self, spec: ProcessSpec) -> Result<(), ConfigError> {
        if spec.command.trim().is_empty() {
            return Err(ConfigError::MissingCommand(spec.name));
        }
        if self.get(&spec.name).is_some() {
            return Err(ConfigError::DuplicateServer(spec.name));
        }
        self.specs.push(spec);
        Ok(())
    }

    #[must_use]
    pub fn with_ambient_environment(mut self, include: bool) -> Self {
        self.include_ambient_environment = include;
        self
    }

    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ProcessSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Build a child's environment: ambient vars (if included) overlaid with overrides.
///
/// Overrides win on key collision.
pub fn effective_env<I>(
    ambient: I,
    include_ambient: bool,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = if include_ambient {
        ambient.into_iter().collect()
    } else {
        HashMap::new()
    };
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

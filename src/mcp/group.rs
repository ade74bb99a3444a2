//! Process group: all-or-nothing startup and reverse-order teardown of the
//! configured servers.
//!
//! ```no_run
//! # async fn demo() -> Result<(), mcp_fleet::mcp::GroupError> {
//! use mcp_fleet::mcp::{ProcessGroup, validate};
//!
//! let config = validate::from_file("~/.config/mcp-fleet/mcp.json")?;
//! let mut group = ProcessGroup::enter_stdio(config).await?;
//! let kubernetes = group.get_server("kubernetes")?;
//! let tools = kubernetes.request("tools/list", None).await;
//! group.exit().await;
//! # let _ = tools;
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::ffi::OsString;
use tracing::{debug, error, info, warn};

use super::child::{ChildHandle, Launcher};
use super::error::GroupError;
use super::spec::GroupConfig;
use super::stack::{ReleaseStack, TeardownReport};
use super::stdio::StdioLauncher;
use super::validate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Uninitialized,
    Entering,
    Ready,
    Exiting,
    Exited,
}

/// A set of running servers that live and die together.
///
/// Only a `Ready` group is ever handed to callers. Dropping a group that still
/// holds servers kills them without waiting; call [`ProcessGroup::exit`] for an
/// orderly shutdown.
#[derive(Debug)]
pub struct ProcessGroup {
    config: GroupConfig,
    state: GroupState,
    stack: ReleaseStack,
}

impl ProcessGroup {
    /// Start every configured server, or none.
    ///
    /// If any server fails, the ones already running are shut down in reverse
    /// order and the original spawn failure is returned. Errors during that
    /// rollback are logged only.
    pub async fn enter(config: GroupConfig, launcher: &dyn Launcher) -> Result<Self, GroupError> {
        let mut group = Self {
            config,
            state: GroupState::Uninitialized,
            stack: ReleaseStack::default(),
        };
        group.start(launcher).await?;
        Ok(group)
    }

    /// [`ProcessGroup::enter`] with the stdio launcher and MCP handshake.
    pub async fn enter_stdio(config: GroupConfig) -> Result<Self, GroupError> {
        Self::enter(config, &StdioLauncher::default()).await
    }

    /// Validate a raw `mcpServers` document, then enter. Nothing is spawned
    /// for an invalid document.
    pub async fn enter_raw(raw: &Value, launcher: &dyn Launcher) -> Result<Self, GroupError> {
        let config = validate(raw)?;
        Self::enter(config, launcher).await
    }

    /// Enter, run `body` against the ready group, then exit whatever `body`
    /// returned. A cancelled body still releases the servers through `Drop`.
    pub async fn scoped<F, R>(
        config: GroupConfig,
        launcher: &dyn Launcher,
        body: F,
    ) -> Result<R, GroupError>
    where
        F: AsyncFnOnce(&ProcessGroup) -> R,
    {
        let mut group = Self::enter(config, launcher).await?;
        let output = body(&group).await;
        group.exit().await;
        Ok(output)
    }

    async fn start(&mut self, launcher: &dyn Launcher) -> Result<(), GroupError> {
        self.state = GroupState::Entering;
        let ambient = ambient_env();

        for spec in self.config.specs() {
            let spawned = ChildHandle::spawn(
                spec,
                ambient.iter().cloned(),
                self.config.include_ambient_environment,
                self.config.startup_timeout,
                launcher,
            )
            .await;

            match spawned {
                Ok(handle) => self.stack.push(handle),
                Err(err) => {
                    error!(server = %err.server(), error = %err, "MCP server failed to start; rolling back");
                    let report = self.stack.unwind(self.config.shutdown_grace).await;
                    for failure in &report.failures {
                        error!(server = %failure.name, cause = %failure.cause, "Rollback failure suppressed");
                    }
                    self.state = GroupState::Exited;
                    return Err(GroupError::Startup(err));
                }
            }
        }

        self.state = GroupState::Ready;
        info!(servers = ?self.stack.names(), "MCP server group ready");
        Ok(())
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Live servers in start order.
    ///
    /// # Panics
    /// If the group is not `Ready`.
    pub fn get_servers(&self) -> Vec<&ChildHandle> {
        self.assert_ready("get_servers");
        self.stack.iter().collect()
    }

    /// Look up one live server by logical name.
    ///
    /// # Panics
    /// If the group is not `Ready`.
    pub fn get_server(&self, name: &str) -> Result<&ChildHandle, GroupError> {
        self.assert_ready("get_server");
        self.stack
            .get(name)
            .ok_or_else(|| GroupError::ServerNotFound {
                name: name.to_string(),
                available: self.stack.names(),
            })
    }

    /// Shut every server down, last started first.
    ///
    /// Never fails: per-server failures are logged and returned in the report.
    /// Calling it again is a no-op.
    pub async fn exit(&mut self) -> TeardownReport {
        if matches!(self.state, GroupState::Exited | GroupState::Uninitialized) {
            return TeardownReport::default();
        }

        self.state = GroupState::Exiting;
        let report = self.stack.unwind(self.config.shutdown_grace).await;
        self.state = GroupState::Exited;

        if report.is_clean() {
            info!(servers = ?report.released, "MCP server group shut down");
        } else {
            for failure in &report.failures {
                error!(server = %failure.name, cause = %failure.cause, "Error while cleaning MCP servers - suppressed");
            }
        }
        report
    }

    fn assert_ready(&self, op: &str) {
        assert!(
            self.state == GroupState::Ready,
            "{op} called on a process group in state {:?}; it is only valid while Ready",
            self.state
        );
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            warn!(
                servers = ?self.stack.names(),
                "Process group dropped without exit; killing servers"
            );
            self.stack.abort_all();
        }
    }
}

fn ambient_env() -> Vec<(String, String)> {
    utf8_env(std::env::vars_os())
}

/// Keep the variables that are valid UTF-8. Children are started with a
/// cleared environment, so anything skipped here does not reach them.
fn utf8_env<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let key = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                debug!(key = %key, "Skipping non-UTF-8 environment variable");
                None
            }
        })
        .collect()
}

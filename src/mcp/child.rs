use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::{McpError, SpawnError, TeardownFailure};
use super::spec::{ProcessSpec, effective_env};

/// Lifecycle of a single supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    NotStarted,
    Starting,
    Running,
    Terminated,
    Failed,
}

/// How a child ended during a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited on its own after the graceful close.
    Graceful,
    /// Needed a termination signal.
    Terminated,
    /// Had to be force-killed.
    Killed,
}

/// Everything a [`Launcher`] needs to start one server.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub name: String,
    /// Absolute path the command resolved to.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete environment for the child; nothing else is inherited.
    pub env: HashMap<String, String>,
}

/// Live communication endpoint to a started server.
#[async_trait]
pub trait Connection: Send {
    /// OS process id, if the endpoint is backed by a process.
    fn pid(&self) -> Option<u32>;

    /// Result of the readiness handshake, if the protocol has one.
    fn server_info(&self) -> Option<&Value> {
        None
    }

    /// Send a request and wait for its result.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError>;

    /// Graceful close, escalating to a forced kill after `grace`.
    async fn close(&mut self, grace: Duration) -> Result<ExitKind, McpError>;

    /// Immediate best-effort kill. Must not block; used from `Drop`.
    fn abort(&mut self);
}

/// Starts a server and completes its readiness handshake.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn Connection>, SpawnError>;
}

/// One supervised server, owned exclusively by its process group.
pub struct ChildHandle {
    name: String,
    state: ChildState,
    pid: Option<u32>,
    server_info: Option<Value>,
    conn: Mutex<Option<Box<dyn Connection>>>,
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildHandle")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ChildHandle {
    /// Resolve, launch and handshake one server.
    ///
    /// Resolution failures return `ExecutableNotFound` before any process is
    /// created. Launches that exceed `startup_timeout` are dropped (which kills
    /// the child) and reported as `StartupFailed`.
    pub async fn spawn<I>(
        spec: &ProcessSpec,
        ambient: I,
        include_ambient: bool,
        startup_timeout: Duration,
        launcher: &dyn Launcher,
    ) -> Result<Self, SpawnError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let ambient: Vec<(String, String)> = ambient.into_iter().collect();
        let ambient_path = ambient
            .iter()
            .find(|(k, _)| k == "PATH")
            .map(|(_, v)| v.clone());
        let env = effective_env(ambient, include_ambient, &spec.env);

        let search_path = env.get("PATH").cloned().or(ambient_path);
        let program = resolve_executable(&spec.command, search_path.as_deref()).ok_or_else(
            || SpawnError::ExecutableNotFound {
                name: spec.name.clone(),
                command: spec.command.clone(),
            },
        )?;

        let mut handle = Self::new(&spec.name);
        handle.state = ChildState::Starting;
        debug!(server = %spec.name, program = %program.display(), "Starting MCP server");

        let request = LaunchRequest {
            name: spec.name.clone(),
            program,
            args: spec.args.clone(),
            env,
        };
        let conn = match tokio::time::timeout(startup_timeout, launcher.launch(&request)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                handle.state = ChildState::Failed;
                return Err(e);
            }
            Err(_) => {
                handle.state = ChildState::Failed;
                return Err(SpawnError::startup(
                    &spec.name,
                    format!(
                        "readiness handshake timed out after {}ms",
                        startup_timeout.as_millis()
                    ),
                ));
            }
        };

        handle.pid = conn.pid();
        handle.server_info = conn.server_info().cloned();
        handle.conn = Mutex::new(Some(conn));
        handle.state = ChildState::Running;
        debug!(server = %spec.name, pid = ?handle.pid, "MCP server ready");
        Ok(handle)
    }

    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ChildState::NotStarted,
            pid: None,
            server_info: None,
            conn: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The server's `initialize` result.
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ChildState::Running
    }

    /// Send a request over the endpoint. Only valid while `Running`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.state != ChildState::Running {
            return Err(McpError::NotRunning(self.name.clone()));
        }
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| McpError::NotRunning(self.name.clone()))?;
        conn.request(method, params).await
    }

    /// Release the server. Idempotent and infallible: failures come back as a
    /// diagnostic, and the handle always ends `Terminated` without an endpoint.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<TeardownFailure> {
        if self.state == ChildState::Terminated {
            return None;
        }
        let conn = self.conn.get_mut().take();
        self.state = ChildState::Terminated;

        let mut conn = conn?;
        match conn.close(grace).await {
            Ok(ExitKind::Graceful) => {
                debug!(server = %self.name, "MCP server exited");
                None
            }
            Ok(kind) => {
                warn!(server = %self.name, ?kind, "MCP server did not exit gracefully");
                None
            }
            Err(err) => Some(TeardownFailure {
                name: self.name.clone(),
                cause: err.to_string(),
            }),
        }
    }

    /// Kill without waiting. Used when a group is dropped without `exit`.
    pub(crate) fn abort(&mut self) {
        if let Some(mut conn) = self.conn.get_mut().take() {
            conn.abort();
        }
        self.state = ChildState::Terminated;
    }
}

/// Resolve a command against `search_path` (or the process `PATH` when `None`).
pub fn resolve_executable(command: &str, search_path: Option<&str>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let found = match search_path {
        Some(paths) => which::which_in(command, Some(paths), &cwd),
        None => which::which(command),
    };
    found.ok().filter(|p| p.is_file())
}

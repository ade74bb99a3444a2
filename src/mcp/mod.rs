//! Lifecycle management for groups of stdio MCP servers.
//!
//! A [`GroupConfig`] (usually produced by [`validate`]) names the servers to
//! run. [`ProcessGroup::enter`] starts all of them or none, exposes them by
//! logical name, and [`ProcessGroup::exit`] shuts them down in reverse order
//! without ever failing.

mod child;
mod error;
mod group;
mod spec;
mod stack;
mod stdio;
pub mod validate;

pub use child::{
    ChildHandle, ChildState, Connection, ExitKind, LaunchRequest, Launcher, resolve_executable,
};
pub use error::{ConfigError, GroupError, McpError, SpawnError, TeardownFailure};
pub use group::{GroupState, ProcessGroup};
pub use spec::{
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_STARTUP_TIMEOUT, GroupConfig, ProcessSpec, effective_env,
};
pub use stack::{ReleaseStack, TeardownReport};
pub use stdio::{Handshake, McpHandshake, StdioConnection, StdioLauncher};
pub use validate::validate;

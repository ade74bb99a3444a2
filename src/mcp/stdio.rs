//! Stdio transport: newline-delimited JSON-RPC over a child's stdin/stdout.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace, warn};

use super::child::{Connection, ExitKind, LaunchRequest, Launcher};
use super::error::{McpError, SpawnError};

/// Wait after SIGTERM before escalating to SIGKILL.
const SIGKILL_TIMEOUT_MS: u64 = 200;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol-specific readiness exchange run right after spawn.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Returns the server's self-description on success.
    async fn perform(&self, conn: &mut StdioConnection) -> Result<Value, McpError>;
}

/// MCP `initialize` followed by `notifications/initialized`.
#[derive(Debug, Clone)]
pub struct McpHandshake {
    pub client_name: String,
    pub client_version: String,
}

impl Default for McpHandshake {
    fn default() -> Self {
        Self {
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[async_trait]
impl Handshake for McpHandshake {
    async fn perform(&self, conn: &mut StdioConnection) -> Result<Value, McpError> {
        let result = conn
            .call(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": self.client_name,
                        "version": self.client_version
                    }
                })),
            )
            .await?;
        conn.notify("notifications/initialized", None).await?;
        Ok(result)
    }
}

/// Spawns servers as child processes and talks to them over stdio.
#[derive(Clone)]
pub struct StdioLauncher {
    handshake: Arc<dyn Handshake>,
}

impl Default for StdioLauncher {
    fn default() -> Self {
        Self::new(McpHandshake::default())
    }
}

impl StdioLauncher {
    pub fn new(handshake: impl Handshake + 'static) -> Self {
        Self {
            handshake: Arc::new(handshake),
        }
    }
}

#[async_trait]
impl Launcher for StdioLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn Connection>, SpawnError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // Own process group, so wrappers like `npx` are stopped with their children.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::startup(&request.name, format!("spawn failed: {e}")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(SpawnError::startup(&request.name, "stdio pipes unavailable"));
        };

        let mut conn = StdioConnection {
            name: request.name.clone(),
            pid: child.id(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            server_info: None,
        };

        match self.handshake.perform(&mut conn).await {
            Ok(info) => {
                conn.server_info = Some(info);
                Ok(Box::new(conn))
            }
            Err(e) => {
                let cause = match conn.child.try_wait() {
                    Ok(Some(status)) => format!("process exited before handshake ({status})"),
                    _ => format!("handshake failed: {e}"),
                };
                conn.kill_group();
                if let Err(kill_err) = conn.child.kill().await {
                    debug!(server = %request.name, error = %kill_err, "Kill after failed handshake");
                }
                Err(SpawnError::startup(&request.name, cause))
            }
        }
    }
}

/// A running server reached over its stdin/stdout.
pub struct StdioConnection {
    name: String,
    pid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    server_info: Option<Value>,
}

impl StdioConnection {
    async fn send(&mut self, message: &Value) -> Result<(), McpError> {
        let stdin = self.stdin.as_mut().ok_or(McpError::Disconnected)?;
        let mut line = serde_json::to_vec(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        trace!(server = %self.name, %message, "Sent");
        Ok(())
    }

    /// Send a request and read until the matching response arrives.
    ///
    /// Notifications, server-initiated requests and non-JSON lines are skipped.
    pub async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.send(&message).await?;

        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(McpError::Disconnected);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(reply) = serde_json::from_str::<Value>(line) else {
                debug!(server = %self.name, line, "Skipping non-JSON output");
                continue;
            };
            if reply.get("id").and_then(Value::as_u64) != Some(id) || reply.get("method").is_some() {
                trace!(server = %self.name, %reply, "Skipping unrelated message");
                continue;
            }
            if let Some(error) = reply.get("error") {
                let msg = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| error.to_string(), str::to_string);
                return Err(McpError::Protocol(msg));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut message = json!({"jsonrpc": "2.0", "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.send(&message).await
    }

    /// Signal every process in the server's group. The group id is the
    /// server's pid. A group with no members left is not an error.
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pgid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) => trace!(server = %self.name, pgid, ?signal, "Signalled process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => debug!(server = %self.name, pgid, ?signal, error = %e, "Failed to signal process group"),
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

#[async_trait]
impl Connection for StdioConnection {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.call(method, params).await
    }

    async fn close(&mut self, grace: Duration) -> Result<ExitKind, McpError> {
        // EOF on stdin asks a stdio server to exit.
        drop(self.stdin.take());

        let kind = if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
            status?;
            ExitKind::Graceful
        } else {
            self.terminate();
            let escalation = Duration::from_millis(SIGKILL_TIMEOUT_MS);
            if cfg!(unix)
                && let Ok(status) = tokio::time::timeout(escalation, self.child.wait()).await
            {
                status?;
                ExitKind::Terminated
            } else {
                warn!(server = %self.name, pid = ?self.pid, "Force killing MCP server");
                self.kill_group();
                self.child
                    .kill()
                    .await
                    .map_err(|e| McpError::Connection(format!("force kill failed: {e}")))?;
                ExitKind::Killed
            }
        };

        // Descendants outlive the leader unless the whole group is killed.
        self.kill_group();
        Ok(kind)
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            debug!(server = %self.name, error = %e, "Abort kill failed");
        }
    }
}

impl Drop for StdioConnection {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the leader.
        if matches!(self.child.try_wait(), Ok(None)) {
            self.kill_group();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp::child::{ChildHandle, ChildState};
    use crate::mcp::spec::ProcessSpec;

    /// Answers `initialize` with id 1, then waits for stdin EOF.
    const GOOD_SERVER: &str = r#"read line; printf '%s\n' 'starting up' '{"jsonrpc":"2.0","id":1,"result":{"serverInfo":{"name":"fake","version":"0.1"}}}'; read note; cat > /dev/null"#;

    /// Answers `initialize`, then ignores EOF and SIGTERM.
    const STUBBORN_SERVER: &str = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'; trap '' TERM; exec sleep 30"#;

    /// Answers `initialize`, then ignores EOF but dies on SIGTERM.
    const SLEEPY_SERVER: &str = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'; exec sleep 30"#;

    /// A wrapper that starts the real work as a grandchild, reports its pid,
    /// and ignores SIGTERM along with it.
    const WRAPPER_SERVER: &str = r#"read line; sh -c 'trap "" TERM; exec sleep 300' </dev/null >/dev/null 2>&1 & printf '{"jsonrpc":"2.0","id":1,"result":{"grandchild":%s}}\n' "$!"; trap '' TERM; wait"#;

    fn spec(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(name, "sh").with_args(["-c", script])
    }

    fn request(name: &str, script: &str) -> LaunchRequest {
        LaunchRequest {
            name: name.into(),
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            env: std::env::vars().collect(),
        }
    }

    /// Running or sleeping, not a zombie.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: u64) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        let state = stat.rsplit(')').next().unwrap_or("").trim_start();
        !state.starts_with('Z') && !state.starts_with('X')
    }

    #[cfg(target_os = "linux")]
    async fn wait_for_exit(pid: u64) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while process_alive(pid) {
            if std::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    async fn spawn(spec: &ProcessSpec, timeout: Duration) -> Result<ChildHandle, SpawnError> {
        ChildHandle::spawn(
            spec,
            std::env::vars(),
            true,
            timeout,
            &StdioLauncher::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_handshake_and_graceful_close() {
        let mut handle = spawn(&spec("fake", GOOD_SERVER), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(handle.state(), ChildState::Running);
        assert!(handle.pid().is_some());
        assert_eq!(handle.server_info().unwrap()["serverInfo"]["name"], "fake");

        assert!(handle.shutdown(Duration::from_secs(5)).await.is_none());
        assert_eq!(handle.state(), ChildState::Terminated);
    }

    #[tokio::test]
    async fn test_stubborn_server_is_killed() {
        let launcher = StdioLauncher::default();
        let mut conn = launcher
            .launch(&request("stubborn", STUBBORN_SERVER))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let kind = conn.close(Duration::from_millis(100)).await.unwrap();
        assert_eq!(kind, ExitKind::Killed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_server_ignoring_eof_is_terminated() {
        let launcher = StdioLauncher::default();
        let mut conn = launcher
            .launch(&request("sleepy", SLEEPY_SERVER))
            .await
            .unwrap();

        let grace = Duration::from_millis(100);
        let started = std::time::Instant::now();
        let kind = conn.close(grace).await.unwrap();
        assert_eq!(kind, ExitKind::Terminated);
        let elapsed = started.elapsed();
        assert!(elapsed >= grace);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_forced_close_kills_descendants() {
        let launcher = StdioLauncher::default();
        let mut conn = launcher
            .launch(&request("wrapper", WRAPPER_SERVER))
            .await
            .unwrap();
        let grandchild = conn.server_info().unwrap()["grandchild"].as_u64().unwrap();
        assert!(process_alive(grandchild));

        let kind = conn.close(Duration::from_millis(100)).await.unwrap();
        assert_eq!(kind, ExitKind::Killed);
        assert!(wait_for_exit(grandchild).await, "pid {grandchild} still running");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abort_kills_descendants() {
        let launcher = StdioLauncher::default();
        let mut conn = launcher
            .launch(&request("wrapper", WRAPPER_SERVER))
            .await
            .unwrap();
        let grandchild = conn.server_info().unwrap()["grandchild"].as_u64().unwrap();

        conn.abort();
        drop(conn);
        assert!(wait_for_exit(grandchild).await, "pid {grandchild} still running");
    }

    #[tokio::test]
    async fn test_exit_before_handshake() {
        let err = spawn(&spec("dies", "exit 3"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::StartupFailed { ref name, .. } if name == "dies"));
    }

    #[tokio::test]
    async fn test_error_response_fails_startup() {
        let script = r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"unsupported"}}'; exec sleep 30"#;
        let err = spawn(&spec("rejects", script), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::StartupFailed { ref cause, .. } if cause.contains("unsupported")));
    }

    #[tokio::test]
    async fn test_hung_handshake_times_out() {
        let err = spawn(&spec("hung", "exec sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::StartupFailed { ref cause, .. } if cause.contains("timed out")));
    }

    #[tokio::test]
    async fn test_request_after_handshake() {
        let script = r#"read a; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'; read b; read c; printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message"}' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"now"}]}}'; cat > /dev/null"#;
        let mut handle = spawn(&spec("time", script), Duration::from_secs(5))
            .await
            .unwrap();
        let result = handle.request("tools/list", None).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "now");
        assert!(handle.shutdown(Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_env_reaches_child() {
        let script = r#"read line; printf '{"jsonrpc":"2.0","id":1,"result":{"seen":"%s"}}\n' "$FLEET_TEST_VAR"; cat > /dev/null"#;
        let spec = spec("env", script).with_env("FLEET_TEST_VAR", "override");
        let mut handle = spawn(&spec, Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.server_info().unwrap()["seen"], "override");
        handle.shutdown(Duration::from_secs(5)).await;
    }
}

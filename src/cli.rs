//! Command-line front end. Thin: it builds a group, hands it to a command,
//! and always exits the group before returning.

use crate::config::Settings;
use crate::error::Error;
use crate::mcp::{ConfigError, GroupConfig, ProcessGroup};
use crate::profile::{self, AgentBlueprint};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Supervise a group of stdio MCP servers
#[derive(Parser, Debug)]
#[command(name = "mcp-fleet", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON file with an `mcpServers` mapping (replaces settings and .mcp.json)
    #[arg(short, long, global = true, conflicts_with = "profile")]
    pub config: Option<PathBuf>,

    /// Built-in server profile (kubernetes-ops)
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Do not pass the parent environment to servers
    #[arg(long = "no-system-env", global = true)]
    pub no_system_env: bool,

    /// Seconds to wait for each server's handshake
    #[arg(long, value_name = "SECS", global = true)]
    pub startup_timeout: Option<u64>,

    /// Milliseconds to wait for a server to exit before killing it
    #[arg(long, value_name = "MS", global = true)]
    pub shutdown_grace: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Validate the configuration and list servers without starting them
    Check,
    /// Start all servers and keep them running until Ctrl-C
    Up,
    /// Start all servers, list their tools, and shut down
    Tools,
}

impl Cli {
    /// Fold CLI flags over the settings file. Flags win.
    #[must_use]
    pub fn resolve_settings(&self, mut settings: Settings) -> Settings {
        if self.no_system_env {
            settings.include_system_env = false;
        }
        if let Some(secs) = self.startup_timeout {
            settings.startup_timeout_secs = secs;
        }
        if let Some(ms) = self.shutdown_grace {
            settings.shutdown_grace_ms = ms;
        }
        settings
    }

    /// Build the group config from the selected source.
    pub fn group_config(&self, settings: &Settings) -> Result<GroupConfig> {
        if let Some(path) = &self.config {
            return Ok(settings.servers_from_file(path)?);
        }
        if let Some(name) = &self.profile {
            let config = profile::by_name(name, |key| std::env::var(key).ok())
                .with_context(|| format!("Unknown profile '{name}'"))??;
            return Ok(settings.apply(config));
        }
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        Ok(settings.discover_servers(&cwd)?)
    }
}

/// Run a parsed command line to completion.
pub async fn run(cli: Cli) -> ExitCode {
    match dispatch(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e.downcast_ref::<Error>().map_or_else(
                || kind_of_source(&e),
                Error::kind,
            );
            eprintln!("Error ({kind}): {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn kind_of_source(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<ConfigError>().is_some() {
        "ConfigInvalid"
    } else {
        "Error"
    }
}

async fn dispatch(cli: &Cli) -> Result<()> {
    let settings = cli.resolve_settings(Settings::load()?);
    let config = cli.group_config(&settings)?;

    if cli.command == Commands::Check {
        print_config(&config);
        return Ok(());
    }

    let mut group = ProcessGroup::enter_stdio(config).await.map_err(Error::from)?;
    let outcome = match cli.command {
        Commands::Up => up(&group).await,
        Commands::Tools => tools(&group).await,
        Commands::Check => Ok(()),
    };
    let report = group.exit().await;
    if !report.is_clean() {
        eprintln!(
            "Warning: {} server(s) did not shut down cleanly",
            report.failures.len()
        );
    }
    outcome
}

fn print_config(config: &GroupConfig) {
    println!("{} server(s):", config.len());
    for spec in config.specs() {
        let mut line = format!("  {:<16} {}", spec.name, spec.command);
        for arg in &spec.args {
            line.push(' ');
            line.push_str(arg);
        }
        if !spec.env.is_empty() {
            let mut keys: Vec<_> = spec.env.keys().map(String::as_str).collect();
            keys.sort_unstable();
            line.push_str(&format!("  [env: {}]", keys.join(", ")));
        }
        println!("{line}");
    }
    println!(
        "system env: {}, startup timeout: {}s, shutdown grace: {}ms",
        if config.include_ambient_environment { "inherited" } else { "isolated" },
        config.startup_timeout.as_secs(),
        config.shutdown_grace.as_millis()
    );
}

async fn up(group: &ProcessGroup) -> Result<()> {
    for handle in group.get_servers() {
        let info = handle
            .server_info()
            .and_then(|i| i.get("serverInfo"))
            .map(|s| {
                format!(
                    "{} {}",
                    s.get("name").and_then(|v| v.as_str()).unwrap_or("?"),
                    s.get("version").and_then(|v| v.as_str()).unwrap_or("")
                )
            })
            .unwrap_or_default();
        let pid = handle.pid().map_or_else(|| "-".to_string(), |p| p.to_string());
        println!("  {:<16} pid {:<8} {}", handle.name(), pid, info.trim());
    }

    let blueprint = AgentBlueprint::kubernetes_ops(group);
    tracing::debug!(agent = %blueprint.name, servers = ?blueprint.servers, "Agent blueprint ready");
    println!("{} server(s) ready. Press Ctrl-C to stop.", blueprint.servers.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Shutting down...");
    Ok(())
}

async fn tools(group: &ProcessGroup) -> Result<()> {
    for handle in group.get_servers() {
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            handle.request("tools/list", None),
        )
        .await
        .with_context(|| format!("tools/list timed out for '{}'", handle.name()))?
        .map_err(Error::from)?;

        let names: Vec<&str> = result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        println!("{} ({} tools)", handle.name(), names.len());
        for name in names {
            println!("  {name}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::parse_from([
            "mcp-fleet",
            "check",
            "--no-system-env",
            "--startup-timeout",
            "7",
        ]);
        let settings = cli.resolve_settings(Settings::default());
        assert!(!settings.include_system_env);
        assert_eq!(settings.startup_timeout_secs, 7);
        assert_eq!(settings.shutdown_grace_ms, 5000);
    }

    #[test]
    fn test_profile_source() {
        let cli = Cli::parse_from(["mcp-fleet", "--profile", "kubernetes-ops", "check"]);
        let config = cli.group_config(&Settings::default()).unwrap();
        assert_eq!(config.len(), 3);
    }

    #[test]
    fn test_unknown_profile() {
        let cli = Cli::parse_from(["mcp-fleet", "--profile", "nope", "check"]);
        let err = cli.group_config(&Settings::default()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_config_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, r#"{"mcpServers": {"time": {"command": "python"}}}"#).unwrap();

        let cli = Cli::parse_from(["mcp-fleet", "up", "--config", path.to_str().unwrap()]);
        assert_eq!(cli.command, Commands::Up);
        let config = cli.group_config(&Settings::default()).unwrap();
        assert_eq!(config.names().collect::<Vec<_>>(), vec!["time"]);
    }

    #[test]
    fn test_config_and_profile_conflict() {
        let result = Cli::try_parse_from([
            "mcp-fleet",
            "--config",
            "a.json",
            "--profile",
            "kubernetes-ops",
            "check",
        ]);
        assert!(result.is_err());
    }
}

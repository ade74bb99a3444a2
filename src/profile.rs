//! Built-in server profiles and the hand-off to an agent runtime.

use crate::mcp::{ConfigError, GroupConfig, ProcessGroup, ProcessSpec};

pub const KUBERNETES_OPS: &str = "kubernetes-ops";

const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";

/// Credentials forwarded to the Prometheus server only when set.
const PROMETHEUS_OPTIONAL_VARS: [&str; 3] = [
    "PROMETHEUS_USERNAME",
    "PROMETHEUS_PASSWORD",
    "PROMETHEUS_TOKEN",
];

const KUBERNETES_OPS_INSTRUCTIONS: &str = "You have access to multiple tool functions for querying different aspects of the Kubernetes cluster, \
Prometheus monitoring system, and time-related operations. \
Before providing a final answer, use as many appropriate tools as possible to gather all relevant information. \
Do not stop after a single call; chain multiple tool actions if needed to ensure a thorough response. \
When using tools that require time parameters, always use the time server to get the precise current time.";

/// Look up a named profile. `lookup` reads the environment.
pub fn by_name<F>(name: &str, lookup: F) -> Option<Result<GroupConfig, ConfigError>>
where
    F: Fn(&str) -> Option<String>,
{
    match name {
        KUBERNETES_OPS => Some(kubernetes_ops(lookup)),
        _ => None,
    }
}

/// Kubernetes, Prometheus and time servers for cluster operations.
pub fn kubernetes_ops<F>(lookup: F) -> Result<GroupConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut prometheus = ProcessSpec::new("prometheus", "prometheus-mcp-server").with_env(
        "PROMETHEUS_URL",
        lookup("PROMETHEUS_URL").unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.to_string()),
    );
    for var in PROMETHEUS_OPTIONAL_VARS {
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            prometheus = prometheus.with_env(var, value);
        }
    }

    GroupConfig::new()
        .with_server(ProcessSpec::new("kubernetes", "npx").with_args(["mcp-server-kubernetes"]))?
        .with_server(prometheus)?
        .with_server(ProcessSpec::new("time", "python").with_args(["-m", "mcp_server_time"]))
}

/// What an agent runtime needs from a ready group.
#[derive(Debug, Clone)]
pub struct AgentBlueprint {
    pub name: String,
    pub instructions: String,
    /// Live servers in start order.
    pub servers: Vec<String>,
}

impl AgentBlueprint {
    pub fn assemble(
        group: &ProcessGroup,
        name: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            servers: group
                .get_servers()
                .iter()
                .map(|h| h.name().to_string())
                .collect(),
        }
    }

    /// Blueprint for the Kubernetes operations agent.
    pub fn kubernetes_ops(group: &ProcessGroup) -> Self {
        Self::assemble(group, "KubernetesAIOpsAgent", KUBERNETES_OPS_INSTRUCTIONS)
    }
}

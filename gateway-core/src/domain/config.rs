// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Upstream server configuration: identity, allow-list, and transport.
//!
//! Transport and credential descriptors are tagged unions rather than an
//! open trait hierarchy — the set of variants is closed and known ahead of
//! time, so a `#[serde(tag = "type")]` enum is the idiomatic fit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A credential sourced from an environment variable, never written to
/// logs or snapshot files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRef {
    pub bearer_env: String,
}

impl AuthRef {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            bearer_env: var.into(),
        }
    }

    /// Resolves the bearer token from the process environment. Returns
    /// `None` if the variable is unset; callers decide whether that is
    /// fatal for the transport in question.
    pub fn resolve(&self) -> Option<String> {
        std::env::var(&self.bearer_env).ok()
    }
}

/// Where a stdio upstream's stderr stream is sent. `Inherit` is the
/// conventional default for operator-visible child process diagnostics;
/// `Null` and `Piped` are available for noisy or untrusted upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StderrDisposition {
    Inherit,
    Null,
    Piped,
}

impl Default for StderrDisposition {
    fn default() -> Self {
        StderrDisposition::Inherit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Streamable-HTTP upstream, addressed by URL with an optional bearer token.
    Http {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<AuthRef>,
    },
    /// A child process speaking MCP over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        stderr: StderrDisposition,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Http { .. } => "http",
            TransportConfig::Stdio { .. } => "stdio",
        }
    }
}

/// Static configuration for one upstream MCP server, created at bootstrap
/// from the config loader and immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServerConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allow-list patterns. `"*"` matches everything; a pattern ending in
    /// `"*"` matches by prefix; anything else must match exactly.
    #[serde(default = "default_allow_all")]
    pub allowed_tools: Vec<String>,
    pub transport: TransportConfig,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_allow_all() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl UpstreamServerConfig {
    /// True iff `tool_name` is permitted by this server's allow-list.
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.allowed_tools.iter().any(|pattern| {
            pattern == "*"
                || pattern == tool_name
                || (pattern.ends_with('*') && tool_name.starts_with(pattern.trim_end_matches('*')))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(allowed: Vec<&str>) -> UpstreamServerConfig {
        UpstreamServerConfig {
            id: "s1".into(),
            name: "server one".into(),
            enabled: true,
            allowed_tools: allowed.into_iter().map(String::from).collect(),
            transport: TransportConfig::Stdio {
                command: "true".into(),
                args: vec![],
                cwd: None,
                env: HashMap::new(),
                stderr: StderrDisposition::Inherit,
            },
            max_retries: 2,
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
        }
    }

    #[test]
    fn allow_list_wildcard_matches_everything() {
        let cfg = stdio_config(vec!["*"]);
        assert!(cfg.allows_tool("anything"));
    }

    #[test]
    fn allow_list_exact_match() {
        let cfg = stdio_config(vec!["read_file"]);
        assert!(cfg.allows_tool("read_file"));
        assert!(!cfg.allows_tool("write_file"));
    }

    #[test]
    fn allow_list_prefix_match() {
        let cfg = stdio_config(vec!["fs."]);
        assert!(!cfg.allows_tool("fs.read"), "bare prefix without trailing * is an exact pattern");
        let cfg = stdio_config(vec!["fs.*"]);
        assert!(cfg.allows_tool("fs.read"));
        assert!(cfg.allows_tool("fs.write"));
        assert!(!cfg.allows_tool("net.fetch"));
    }
}

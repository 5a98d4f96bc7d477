// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Owns one logical MCP connection per upstream server: lazy establishment
//! serialized by a per-server lock (so concurrent first callers share one
//! connect attempt), health bookkeeping, and retry with exponential
//! backoff for restartable (stdio) transports.
//!
//! Transport establishment mirrors the rmcp client pattern used elsewhere
//! in this codebase's MCP tooling: `TokioChildProcess` for stdio,
//! `StreamableHttpClientTransport` for streamable HTTP.

use crate::domain::catalog::ToolDescriptor;
use crate::domain::config::{TransportConfig, UpstreamServerConfig};
use crate::domain::errors::UpstreamError;
use crate::domain::health::{compute_backoff_ms, HealthSnapshot, ServerHealthState};
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

type Connection = RunningService<RoleClient, ()>;

struct ServerEntry {
    config: UpstreamServerConfig,
    health: Arc<ServerHealthState>,
    /// Serializes connect attempts so at most one is in flight per server;
    /// also guards the live connection slot.
    connection: Arc<AsyncMutex<Option<Connection>>>,
}

/// Multiplexes many upstream MCP servers behind one `listTools`/`callTool`
/// surface, handling connection lifecycle and retry for each independently.
pub struct UpstreamManager {
    servers: HashMap<String, ServerEntry>,
}

impl UpstreamManager {
    pub fn new(configs: Vec<UpstreamServerConfig>) -> Result<Self, UpstreamError> {
        let mut servers = HashMap::with_capacity(configs.len());
        for config in configs {
            validate_server_id(&config.id)?;
            let health = Arc::new(ServerHealthState::new(
                &config.id,
                config.transport.kind(),
                config.enabled,
            ));
            servers.insert(
                config.id.clone(),
                ServerEntry {
                    config,
                    health,
                    connection: Arc::new(AsyncMutex::new(None)),
                },
            );
        }
        Ok(Self { servers })
    }

    pub fn list_server_configs(&self) -> Vec<&UpstreamServerConfig> {
        let mut configs: Vec<_> = self.servers.values().map(|e| &e.config).collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    pub fn get_server_config(&self, server_id: &str) -> Option<&UpstreamServerConfig> {
        self.servers.get(server_id).map(|e| &e.config)
    }

    pub fn get_health_snapshot(&self) -> Vec<HealthSnapshot> {
        let mut snapshots: Vec<_> = self.servers.values().map(|e| e.health.snapshot()).collect();
        snapshots.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        snapshots
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDescriptor>, UpstreamError> {
        self.run_operation(server_id, |conn| async move {
            let tools = conn
                .list_tools(Default::default())
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;
            Ok(tools
                .tools
                .into_iter()
                .map(|t| ToolDescriptor {
                    name: t.name.to_string(),
                    title: t.title().map(|s| s.to_string()),
                    description: t.description.as_ref().map(|d| d.to_string()),
                    input_schema: Value::Object((*t.input_schema).clone()),
                    output_schema: t
                        .output_schema
                        .as_ref()
                        .map(|s| Value::Object((**s).clone())),
                    annotations: t
                        .annotations
                        .as_ref()
                        .and_then(|a| serde_json::to_value(a).ok()),
                })
                .collect())
        })
        .await
    }

    pub async fn call_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, UpstreamError> {
        let name = name.to_string();
        self.run_operation(server_id, move |conn| {
            let name = name.clone();
            let arguments = arguments.clone();
            async move {
                let result = conn
                    .call_tool(CallToolRequestParam {
                        name: name.into(),
                        arguments: arguments.as_object().cloned(),
                    })
                    .await
                    .map_err(|e| UpstreamError::Transport(e.to_string()))?;
                serde_json::to_value(result).map_err(|e| UpstreamError::Transport(e.to_string()))
            }
        })
        .await
    }

    pub async fn close_all(&self) {
        for entry in self.servers.values() {
            let mut slot = entry.connection.lock().await;
            if let Some(conn) = slot.take() {
                if let Err(e) = conn.cancel().await {
                    warn!(server_id = %entry.config.id, error = %e, "error closing upstream connection");
                }
            }
            entry.health.record_disconnected();
        }
    }

    /// Wraps a single upstream call with the retry/backoff policy from
    /// the design: up to `max_retries + 1` attempts for stdio transports,
    /// a single attempt for HTTP (treated as stateless per request).
    async fn run_operation<F, Fut, T>(&self, server_id: &str, op: F) -> Result<T, UpstreamError>
    where
        F: Fn(&Connection) -> Fut,
        Fut: std::future::Future<Output = Result<T, UpstreamError>>,
    {
        let entry = self
            .servers
            .get(server_id)
            .ok_or_else(|| UpstreamError::UnknownServer(server_id.to_string()))?;

        entry.health.record_call_start();
        if !entry.config.enabled {
            return Err(UpstreamError::ServerDisabled(server_id.to_string()));
        }

        let is_stdio = matches!(entry.config.transport, TransportConfig::Stdio { .. });
        let max_attempts = if is_stdio { entry.config.max_retries + 1 } else { 1 };

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            self.wait_for_retry_window(entry).await;

            let connect_result = self.ensure_connection(entry).await;
            let conn_guard = match connect_result {
                Ok(guard) => guard,
                Err(e) => {
                    self.record_attempt_failure_and_maybe_backoff(entry, e.to_string(), attempt, max_attempts);
                    last_error = Some(e);
                    continue;
                }
            };

            match op(conn_guard.as_ref().expect("connection present after ensure_connection")).await {
                Ok(value) => {
                    entry.health.record_success();
                    metrics::counter!("gateway_upstream_calls_total", "server_id" => entry.config.id.clone(), "result" => "success").increment(1);
                    return Ok(value);
                }
                Err(e) => {
                    drop(conn_guard);
                    self.drop_connection(entry).await;
                    self.record_attempt_failure_and_maybe_backoff(entry, e.to_string(), attempt, max_attempts);
                    last_error = Some(e);
                }
            }
        }

        // Every attempt failed: exactly one failed *call*, however many
        // attempts it took, so `successfulCalls + failedCalls <= totalCalls`.
        entry.health.record_failed_call();
        metrics::counter!("gateway_upstream_calls_total", "server_id" => entry.config.id.clone(), "result" => "failure").increment(1);
        Err(last_error.unwrap_or_else(|| UpstreamError::Transport("exhausted retries".into())))
    }

    /// Records one failed attempt (bumping `consecutiveFailures`, not
    /// `failedCalls`) and, if another attempt remains, computes and arms
    /// the backoff delay before it.
    fn record_attempt_failure_and_maybe_backoff(
        &self,
        entry: &ServerEntry,
        error_text: String,
        attempt: u32,
        max_attempts: u32,
    ) {
        let consecutive_failures = entry.health.record_attempt_failure(error_text);
        if attempt < max_attempts {
            let delay_ms = compute_backoff_ms(
                consecutive_failures,
                entry.config.base_backoff_ms,
                entry.config.max_backoff_ms,
            );
            let next_retry_at = chrono::Utc::now().timestamp_millis() + delay_ms as i64;
            entry.health.record_restart(next_retry_at);
            metrics::counter!("gateway_upstream_retries_total", "server_id" => entry.config.id.clone()).increment(1);
            info!(server_id = %entry.config.id, delay_ms, attempt, "retrying upstream operation after backoff");
        }
    }

    async fn wait_for_retry_window(&self, entry: &ServerEntry) {
        if let Some(next_retry_at_ms) = entry.health.next_retry_at_ms() {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if next_retry_at_ms > now_ms {
                let wait_ms = (next_retry_at_ms - now_ms).max(0) as u64;
                tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
            }
        }
    }

    async fn drop_connection(&self, entry: &ServerEntry) {
        let mut slot = entry.connection.lock().await;
        if let Some(conn) = slot.take() {
            let _ = conn.cancel().await;
        }
        entry.health.record_disconnected();
    }

    /// Returns the locked connection slot, connecting first if empty. The
    /// lock itself is the "at most one in-flight attempt per server" gate:
    /// concurrent callers block on the same mutex rather than racing to
    /// spawn separate transports.
    async fn ensure_connection<'a>(
        &self,
        entry: &'a ServerEntry,
    ) -> Result<tokio::sync::MutexGuard<'a, Option<Connection>>, UpstreamError> {
        let mut slot = entry.connection.lock().await;
        if slot.is_some() {
            return Ok(slot);
        }
        let conn = connect(&entry.config).await?;
        entry.health.record_connected();
        *slot = Some(conn);
        Ok(slot)
    }
}

async fn connect(config: &UpstreamServerConfig) -> Result<Connection, UpstreamError> {
    match &config.transport {
        TransportConfig::Http { url, auth } => {
            let mut transport = StreamableHttpClientTransport::from_uri(url.as_str());
            if let Some(auth_ref) = auth {
                if let Some(token) = auth_ref.resolve() {
                    transport = transport.with_bearer_token(token);
                }
            }
            ().serve(transport)
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))
        }
        TransportConfig::Stdio { command, args, cwd, env, stderr } => {
            let mut cmd = Command::new(command);
            cmd.args(args);
            if let Some(cwd) = cwd {
                cmd.current_dir(cwd);
            }
            for (key, value) in env {
                cmd.env(key, value);
            }
            cmd.stderr(match stderr {
                crate::domain::config::StderrDisposition::Inherit => std::process::Stdio::inherit(),
                crate::domain::config::StderrDisposition::Null => std::process::Stdio::null(),
                crate::domain::config::StderrDisposition::Piped => std::process::Stdio::piped(),
            });
            let transport = TokioChildProcess::new(cmd)
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;
            ().serve(transport)
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))
        }
    }
}

fn validate_server_id(id: &str) -> Result<(), UpstreamError> {
    let valid = !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(UpstreamError::InvalidServerName(id.to_string()))
    }
}

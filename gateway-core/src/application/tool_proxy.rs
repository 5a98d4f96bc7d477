// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Authorizes, validates, and routes a single tool invocation: allow-list
//! enforcement, on-demand refresh on catalog misses, and a schema
//! validator cache keyed by `(serverId, toolName, snapshotHash)` so a
//! schema change invalidates the cached compiled validator automatically.

use crate::domain::catalog::ToolRecord;
use crate::domain::errors::ProxyError;
use crate::infrastructure::catalog_store::CatalogStore;
use crate::infrastructure::upstream_manager::UpstreamManager;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A hook that triggers a targeted re-sync of one server, injected by the
/// outer process so the proxy can absorb drift between the local catalog
/// and a live upstream without depending on the Sync Service directly.
pub type RefreshHook = Arc<dyn Fn(String) -> BoxFuture<Result<(), ProxyError>> + Send + Sync>;

pub struct ToolProxy {
    catalog: Arc<CatalogStore>,
    upstream: Arc<UpstreamManager>,
    refresh_hook: Option<RefreshHook>,
    validators: parking_lot::RwLock<HashMap<(String, String, String), Arc<jsonschema::Validator>>>,
}

impl ToolProxy {
    pub fn new(catalog: Arc<CatalogStore>, upstream: Arc<UpstreamManager>, refresh_hook: Option<RefreshHook>) -> Self {
        Self {
            catalog,
            upstream,
            refresh_hook,
            validators: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Authorizes, validates, and forwards a tool call. See the design's
    /// step-by-step algorithm; error variants map one-to-one onto §7's
    /// table so callers can tell apart "not allowed" from "not found" from
    /// "bad arguments".
    pub async fn call(&self, server_id: &str, name: &str, arguments: Option<Value>) -> Result<Value, ProxyError> {
        let server = self
            .catalog
            .get_server(server_id)
            .await?
            .ok_or_else(|| ProxyError::UnknownServer(server_id.to_string()))?;
        if !server.enabled {
            return Err(ProxyError::ServerDisabled(server_id.to_string()));
        }

        if !server.allows_tool(name) {
            return Err(ProxyError::ToolNotAllowed {
                server_id: server_id.to_string(),
                tool: name.to_string(),
            });
        }

        let mut tool = self.lookup_tool_with_refresh(server_id, name).await?;

        let arguments = arguments.unwrap_or_else(|| Value::Object(Default::default()));
        let validator = self.validator_for(&tool)?;
        let original_validation_error = validator.validate(&arguments).err().map(|e| e.to_string());

        if let Some(original_error) = original_validation_error {
            if let Some(hook) = &self.refresh_hook {
                info!(server_id = %server_id, tool = %name, "proxy.refresh.start");
                hook(server_id.to_string()).await?;
                if let Some(refreshed) = self.catalog.get_tool(server_id, name).await? {
                    tool = refreshed;
                    let refreshed_validator = self.validator_for(&tool)?;
                    if refreshed_validator.validate(&arguments).is_ok() {
                        return self.upstream.call_tool(server_id, name, arguments).await.map_err(Into::into);
                    }
                }
            }
            // Refresh absorbed nothing useful; surface the error the caller
            // originally hit, not a refresh artifact.
            return Err(ProxyError::ValidationFailed(original_error));
        }

        self.upstream.call_tool(server_id, name, arguments).await.map_err(Into::into)
    }

    async fn lookup_tool_with_refresh(&self, server_id: &str, name: &str) -> Result<ToolRecord, ProxyError> {
        if let Some(tool) = self.catalog.get_tool(server_id, name).await? {
            return Ok(tool);
        }
        if let Some(hook) = &self.refresh_hook {
            info!(server_id = %server_id, tool = %name, "proxy.refresh.start");
            hook(server_id.to_string()).await?;
            if let Some(tool) = self.catalog.get_tool(server_id, name).await? {
                return Ok(tool);
            }
        }
        Err(ProxyError::ToolNotFound {
            server_id: server_id.to_string(),
            tool: name.to_string(),
        })
    }

    fn validator_for(&self, tool: &ToolRecord) -> Result<Arc<jsonschema::Validator>, ProxyError> {
        let key = (tool.server_id.clone(), tool.name.clone(), tool.snapshot_hash.clone());
        if let Some(existing) = self.validators.read().get(&key) {
            return Ok(existing.clone());
        }

        let compiled = jsonschema::validator_for(&tool.input_schema)
            .map_err(|e| ProxyError::ValidationFailed(format!("invalid input schema: {e}")))?;
        let compiled = Arc::new(compiled);
        self.validators.write().insert(key, compiled.clone());
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Snapshot;
    use crate::domain::config::{StderrDisposition, TransportConfig, UpstreamServerConfig};
    use std::collections::HashMap as StdHashMap;

    fn sample_server(id: &str, allowed: Vec<&str>) -> UpstreamServerConfig {
        UpstreamServerConfig {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            allowed_tools: allowed.into_iter().map(String::from).collect(),
            transport: TransportConfig::Stdio {
                command: "/no/such/binary-proxy-test".into(),
                args: vec![],
                cwd: None,
                env: StdHashMap::new(),
                stderr: StderrDisposition::Null,
            },
            max_retries: 0,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn sample_tool(server_id: &str, hash: &str) -> ToolRecord {
        ToolRecord {
            server_id: server_id.to_string(),
            name: "get_item".to_string(),
            title: None,
            description: None,
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
            output_schema: None,
            annotations: None,
            searchable_text: "get_item".to_string(),
            snapshot_hash: hash.to_string(),
        }
    }

    async fn setup(server: UpstreamServerConfig, tool: ToolRecord) -> (Arc<CatalogStore>, ToolProxy) {
        let catalog = Arc::new(CatalogStore::open_in_memory().await.unwrap());
        catalog.upsert_servers(&[server.clone()]).await.unwrap();
        let snapshot = Snapshot {
            server_id: server.id.clone(),
            snapshot_hash: tool.snapshot_hash.clone(),
            snapshot_path: "/tmp/snap.json".to_string(),
            created_at: chrono::Utc::now(),
        };
        catalog
            .replace_server_tools(&server.id, &snapshot, &[tool])
            .await
            .unwrap();
        let upstream = Arc::new(UpstreamManager::new(vec![server]).unwrap());
        let proxy = ToolProxy::new(catalog.clone(), upstream, None);
        (catalog, proxy)
    }

    #[tokio::test]
    async fn blocks_invalid_arguments() {
        let (_catalog, proxy) = setup(sample_server("s1", vec!["*"]), sample_tool("s1", "h1")).await;
        let result = proxy.call("s1", "get_item", Some(serde_json::json!({}))).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ProxyError::ValidationFailed(_)));
        assert!(err.to_string().to_lowercase().contains("validation failed"));
    }

    #[tokio::test]
    async fn denies_tools_outside_allow_list() {
        let (_catalog, proxy) = setup(sample_server("s1", vec!["other_tool"]), sample_tool("s1", "h1")).await;
        let result = proxy.call("s1", "get_item", Some(serde_json::json!({"id": "1"}))).await;
        assert!(matches!(result.unwrap_err(), ProxyError::ToolNotAllowed { .. }));
    }

    #[tokio::test]
    async fn fails_for_disabled_server() {
        let mut server = sample_server("s1", vec!["*"]);
        server.enabled = false;
        let (_catalog, proxy) = setup(server, sample_tool("s1", "h1")).await;
        let result = proxy.call("s1", "get_item", None).await;
        assert!(matches!(result.unwrap_err(), ProxyError::ServerDisabled(_)));
    }

    #[tokio::test]
    async fn fails_for_unknown_tool_without_refresh_hook() {
        let (_catalog, proxy) = setup(sample_server("s1", vec!["*"]), sample_tool("s1", "h1")).await;
        let result = proxy.call("s1", "does_not_exist", None).await;
        assert!(matches!(result.unwrap_err(), ProxyError::ToolNotFound { .. }));
    }
}

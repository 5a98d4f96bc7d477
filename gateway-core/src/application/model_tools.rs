// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The two operations the model-facing surface ultimately reduces to:
//! `search` (discover) and `execute` (invoke). Both run a snippet in the
//! Sandbox Runtime with a curated host bridge — `catalog` for discovery,
//! `tool` for invocation — and wrap the outcome in the bit-compatible
//! response envelope from `normalize`. The outer JSON-RPC framing that
//! receives `{ code }` over the wire and calls these functions is the named
//! external collaborator; this module is as far as the core goes.

use crate::application::tool_proxy::ToolProxy;
use crate::domain::catalog::ToolQuery;
use crate::infrastructure::catalog_store::CatalogStore;
use crate::infrastructure::sandbox::{BoxFuture, SandboxGlobal, SandboxRuntime};
use crate::normalize::{build_error_response, build_tool_response, normalize_execute_result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ModelTools {
    sandbox: Arc<SandboxRuntime>,
    catalog: Arc<CatalogStore>,
    proxy: Arc<ToolProxy>,
}

impl ModelTools {
    pub fn new(sandbox: Arc<SandboxRuntime>, catalog: Arc<CatalogStore>, proxy: Arc<ToolProxy>) -> Self {
        Self { sandbox, catalog, proxy }
    }

    /// Runs `code` against an injected `catalog` global exposing
    /// `listServers()`, `findTools({ query?, serverId?, limit? })`, and
    /// `getTool(serverId, toolName)`.
    pub async fn search(&self, code: &str) -> Value {
        let mut catalog_ns = BTreeMap::new();

        let catalog_for_list = self.catalog.clone();
        catalog_ns.insert(
            "listServers".to_string(),
            SandboxGlobal::Function(Arc::new(move |_args| {
                let catalog = catalog_for_list.clone();
                box_future(async move {
                    let servers = catalog.list_servers().await.map_err(|e| e.to_string())?;
                    serde_json::to_value(servers).map_err(|e| e.to_string())
                })
            })),
        );

        let catalog_for_find = self.catalog.clone();
        catalog_ns.insert(
            "findTools".to_string(),
            SandboxGlobal::Function(Arc::new(move |args| {
                let catalog = catalog_for_find.clone();
                box_future(async move {
                    let query = parse_tool_query(args.into_iter().next().unwrap_or(Value::Null));
                    let tools = catalog.search_tools(&query).await.map_err(|e| e.to_string())?;
                    serde_json::to_value(tools).map_err(|e| e.to_string())
                })
            })),
        );

        let catalog_for_get = self.catalog.clone();
        catalog_ns.insert(
            "getTool".to_string(),
            SandboxGlobal::Function(Arc::new(move |args| {
                let catalog = catalog_for_get.clone();
                box_future(async move {
                    let server_id = args.first().and_then(Value::as_str).unwrap_or("").to_string();
                    let name = args.get(1).and_then(Value::as_str).unwrap_or("").to_string();
                    let tool = catalog.get_tool(&server_id, &name).await.map_err(|e| e.to_string())?;
                    serde_json::to_value(tool).map_err(|e| e.to_string())
                })
            })),
        );

        let mut globals = BTreeMap::new();
        globals.insert("catalog".to_string(), SandboxGlobal::Namespace(catalog_ns));

        self.run_and_wrap("search", code, globals).await
    }

    /// Runs `code` against an injected `tool.call({ serverId, name,
    /// arguments? })`. The resolved value is normalized before it is
    /// serialized into the response envelope.
    pub async fn execute(&self, code: &str) -> Value {
        let mut tool_ns = BTreeMap::new();

        let proxy = self.proxy.clone();
        tool_ns.insert(
            "call".to_string(),
            SandboxGlobal::Function(Arc::new(move |args| {
                let proxy = proxy.clone();
                box_future(async move {
                    let request = args.into_iter().next().unwrap_or(Value::Null);
                    let server_id = request.get("serverId").and_then(Value::as_str).unwrap_or("").to_string();
                    let name = request.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    let arguments = request.get("arguments").cloned();
                    proxy.call(&server_id, &name, arguments).await.map_err(|e| e.to_string())
                })
            })),
        );

        let mut globals = BTreeMap::new();
        globals.insert("tool".to_string(), SandboxGlobal::Namespace(tool_ns));

        let code = code.to_string();
        match self
            .sandbox
            .execute(&code, None, None, globals)
            .await
        {
            Ok(result) => build_tool_response(&normalize_execute_result(result), self.sandbox.default_max_result_chars()),
            Err(e) => build_error_response("execute", &e.to_string()),
        }
    }

    async fn run_and_wrap(&self, op: &str, code: &str, globals: BTreeMap<String, SandboxGlobal>) -> Value {
        match self.sandbox.execute(code, None, None, globals).await {
            Ok(result) => build_tool_response(&result, self.sandbox.default_max_result_chars()),
            Err(e) => build_error_response(op, &e.to_string()),
        }
    }
}

fn parse_tool_query(value: Value) -> ToolQuery {
    ToolQuery {
        query: value.get("query").and_then(Value::as_str).map(str::to_string),
        server_id: value.get("serverId").and_then(Value::as_str).map(str::to_string),
        limit: value.get("limit").and_then(Value::as_u64).map(|v| v as u32),
    }
}

fn box_future<F>(fut: F) -> BoxFuture<Result<Value, String>>
where
    F: std::future::Future<Output = Result<Value, String>> + Send + 'static,
{
    Box::pin(fut)
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandboxed execution of model-supplied code snippets against a curated
//! host bridge, built on `rquickjs`. The host never exposes raw host
//! objects to the guest: every callable is wrapped as a JS function that
//! marshals arguments and results through JSON, mirroring the
//! discovery/host-bridge pattern this codebase already uses for its
//! code-mode sandboxing of MCP tool catalogs.

use crate::domain::errors::SandboxError;
use rquickjs::function::Rest;
use rquickjs::{AsyncContext, AsyncRuntime, CatchResultExt, Ctx, Function, Object, Value as JsValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type HostFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<Result<Value, String>> + Send + Sync>;

/// A node in the globals tree handed to the sandbox: either a plain JSON
/// value, a callable bridged back into host code, or a namespace object
/// containing more of either.
#[derive(Clone)]
pub enum SandboxGlobal {
    Value(Value),
    Function(HostFn),
    Namespace(BTreeMap<String, SandboxGlobal>),
}

const RESULT_DEPTH_CAP: usize = 8;

pub struct SandboxRuntime {
    default_timeout_ms: u64,
    default_max_code_length: usize,
    default_max_result_chars: usize,
}

impl SandboxRuntime {
    pub fn new(default_timeout_ms: u64, default_max_code_length: usize, default_max_result_chars: usize) -> Self {
        Self {
            default_timeout_ms,
            default_max_code_length,
            default_max_result_chars,
        }
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    pub fn default_max_result_chars(&self) -> usize {
        self.default_max_result_chars
    }

    /// Runs `code` with the given globals tree, enforcing `timeout_ms` and
    /// `max_code_length`. `code` must evaluate to a callable (an async
    /// arrow is the conventional shape); its resolved value is depth- and
    /// size-capped before being handed back.
    pub async fn execute(
        &self,
        code: &str,
        timeout_ms: Option<u64>,
        max_code_length: Option<usize>,
        globals: BTreeMap<String, SandboxGlobal>,
    ) -> Result<Value, SandboxError> {
        let timeout_ms = timeout_ms.unwrap_or(self.default_timeout_ms);
        let max_code_length = max_code_length.unwrap_or(self.default_max_code_length);

        if code.is_empty() || code.len() > max_code_length {
            return Err(SandboxError::CodeTooLarge { max: max_code_length });
        }

        let code = code.to_string();
        let fut = run_in_worker(code, globals);

        metrics::counter!("gateway_sandbox_invocations_total").increment(1);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("gateway_sandbox_timeouts_total").increment(1);
                Err(SandboxError::Timeout(timeout_ms))
            }
        }
    }
}

async fn run_in_worker(
    code: String,
    globals: BTreeMap<String, SandboxGlobal>,
) -> Result<Value, SandboxError> {
    let runtime = AsyncRuntime::new().map_err(|e| SandboxError::Evaluation(e.to_string()))?;
    let context = AsyncContext::full(&runtime)
        .await
        .map_err(|e| SandboxError::Evaluation(e.to_string()))?;

    context
        .with(|ctx| -> Result<(), SandboxError> {
            let global_obj = ctx.globals();
            for (name, value) in &globals {
                install_global(&ctx, &global_obj, name, value)?;
            }
            Ok(())
        })
        .await?;

    let wrapped = format!("(async () => {{ const __entry = ({code}); return await __entry(); }})()");

    let result: rquickjs::Result<Value> = async {
        let promise = context.with(|ctx| ctx.eval::<rquickjs::Promise, _>(wrapped)).await?;
        let js_value: rquickjs::Value = promise.into_future().await?;
        context.with(|ctx| js_to_json(&ctx, &js_value, 0)).await
    }
    .catch(&context)
    .await;

    let result = result.map_err(|e| SandboxError::Evaluation(e.to_string()))?;

    Ok(cap_depth(result, RESULT_DEPTH_CAP))
}

fn install_global<'js>(
    ctx: &Ctx<'js>,
    target: &Object<'js>,
    name: &str,
    value: &SandboxGlobal,
) -> Result<(), SandboxError> {
    match value {
        SandboxGlobal::Value(json) => {
            let js = json_to_js(ctx, json).map_err(|e| SandboxError::Evaluation(e.to_string()))?;
            target.set(name, js).map_err(|e| SandboxError::Evaluation(e.to_string()))?;
        }
        SandboxGlobal::Function(host_fn) => {
            let host_fn = host_fn.clone();
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| {
                    let host_fn = host_fn.clone();
                    let json_args: Vec<Value> = args
                        .0
                        .iter()
                        .map(|v| js_to_json(&ctx, v, 0).unwrap_or(Value::Null))
                        .collect();
                    async move {
                        match host_fn(json_args).await {
                            Ok(value) => json_to_js(&ctx, &value),
                            Err(message) => {
                                let thrown = rquickjs::String::from_str(ctx.clone(), &message)?.into_value();
                                Err(ctx.throw(thrown))
                            }
                        }
                    }
                },
            )
            .map_err(|e| SandboxError::BridgeCall(e.to_string()))?;
            target
                .set(name, func)
                .map_err(|e| SandboxError::BridgeCall(e.to_string()))?;
        }
        SandboxGlobal::Namespace(children) => {
            let ns = Object::new(ctx.clone()).map_err(|e| SandboxError::Evaluation(e.to_string()))?;
            for (child_name, child_value) in children {
                install_global(ctx, &ns, child_name, child_value)?;
            }
            target.set(name, ns).map_err(|e| SandboxError::Evaluation(e.to_string()))?;
        }
    }
    Ok(())
}

fn json_to_js<'js>(ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<rquickjs::Value<'js>> {
    let text = value.to_string();
    ctx.json_parse(text)
}

fn js_to_json(ctx: &Ctx<'_>, value: &rquickjs::Value<'_>, depth: usize) -> rquickjs::Result<Value> {
    if depth > RESULT_DEPTH_CAP {
        return Ok(Value::String("[max_depth_reached]".to_string()));
    }
    let text: String = ctx.json_stringify(value.clone())?.map(|s| s.to_string()).transpose()?.unwrap_or_else(|| "null".to_string());
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}

/// Deep-freezes/size-bounds a result: depth beyond `max_depth` is replaced
/// with a sentinel string, mirroring the bridge's own safe-clone pass.
fn cap_depth(value: Value, max_depth: usize) -> Value {
    fn go(value: Value, depth: usize, max_depth: usize) -> Value {
        if depth >= max_depth {
            return match value {
                Value::Object(_) | Value::Array(_) => Value::String("[max_depth_reached]".to_string()),
                other => other,
            };
        }
        match value {
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| go(v, depth + 1, max_depth)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, go(v, depth + 1, max_depth)))
                    .collect(),
            ),
            other => other,
        }
    }
    go(value, 0, max_depth)
}

/// JSON-encodes `value` (indent 2) and slices it to `max_chars` if needed,
/// leaving room for the truncation suffix.
pub fn serialize_with_limit(value: &Value, max_chars: usize) -> String {
    let full = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    if full.len() <= max_chars {
        return full;
    }
    let suffix = format!("\n... [truncated to {max_chars} chars]");
    let keep = max_chars.saturating_sub(suffix.len());
    let mut truncated = full.chars().take(keep).collect::<String>();
    truncated.push_str(&suffix);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn executes_simple_return_value() {
        let sandbox = SandboxRuntime::new(1000, 10_000, 10_000);
        let result = sandbox
            .execute("async () => ({ ok: true, n: 2 + 2 })", None, None, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result["ok"], Value::Bool(true));
        assert_eq!(result["n"], Value::from(4));
    }

    #[tokio::test]
    async fn bridges_host_function_calls() {
        let mut globals = BTreeMap::new();
        let mut catalog = BTreeMap::new();
        let list_servers: HostFn = Arc::new(|_args| {
            Box::pin(async move {
                Ok(Value::Array(vec![
                    serde_json::json!({"id": "a"}),
                    serde_json::json!({"id": "b"}),
                ]))
            })
        });
        catalog.insert("listServers".to_string(), SandboxGlobal::Function(list_servers));
        globals.insert("catalog".to_string(), SandboxGlobal::Namespace(catalog));

        let sandbox = SandboxRuntime::new(2000, 10_000, 10_000);
        let result = sandbox
            .execute(
                "async () => { const s = await catalog.listServers(); return { count: s.length }; }",
                None,
                None,
                globals,
            )
            .await
            .unwrap();
        assert_eq!(result["count"], Value::from(2));
    }

    #[tokio::test]
    async fn times_out_on_never_resolving_promise() {
        let sandbox = SandboxRuntime::new(100, 10_000, 10_000);
        let result = sandbox
            .execute("async () => { await new Promise(() => {}); }", Some(100), None, BTreeMap::new())
            .await;
        assert!(matches!(result, Err(SandboxError::Timeout(_))));
    }

    #[test]
    fn serialize_with_limit_respects_bound() {
        let value = serde_json::json!({"x": "y".repeat(1000)});
        let s = serialize_with_limit(&value, 200);
        assert!(s.len() <= 200);
        assert!(s.contains("truncated"));
    }
}

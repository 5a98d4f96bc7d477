// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shapes the raw value an upstream's `callTool` hands back into the
//! bounded, model-facing envelope the `execute()` tool returns. None of
//! this runs inside the sandbox — it is applied by the host after the
//! sandboxed snippet resolves, so a misbehaving upstream cannot blow the
//! response budget regardless of what code produced the value.

use serde_json::{Map, Value};

pub const TEXT_TRUNCATE_LEN: usize = 4000;
pub const DATA_PREVIEW_LEN: usize = 96;
pub const CONTENT_ITEM_CAP: usize = 40;
pub const ARRAY_CAP: usize = 40;
pub const OBJECT_KEY_CAP: usize = 60;
pub const MAX_DEPTH: usize = 7;

/// Normalizes a raw `execute()` return value. If it carries a `content`
/// array (the shape an MCP `callTool` result takes), each item is rewritten
/// by its `type` tag and the array itself is capped at 40 entries. Anything
/// else — including a `content`-less object — goes through the generic
/// string/array/object/depth bounding pass.
pub fn normalize_execute_result(value: Value) -> Value {
    if let Value::Object(map) = &value {
        if let Some(Value::Array(_)) = map.get("content") {
            return normalize_content_envelope(value);
        }
    }
    generic_normalize(value, 0)
}

fn normalize_content_envelope(value: Value) -> Value {
    let Value::Object(mut map) = value else { return value };
    let items = match map.remove("content") {
        Some(Value::Array(items)) => items,
        other => {
            if let Some(v) = other {
                map.insert("content".to_string(), v);
            }
            return Value::Object(map);
        }
    };

    let original_len = items.len();
    let capped: Vec<Value> = items
        .into_iter()
        .take(CONTENT_ITEM_CAP)
        .map(normalize_content_item)
        .collect();

    map.insert("content".to_string(), Value::Array(capped));
    if original_len > CONTENT_ITEM_CAP {
        map.insert("contentTruncated".to_string(), Value::Bool(true));
        map.insert("contentOriginalLength".to_string(), Value::from(original_len));
    }
    Value::Object(map)
}

fn normalize_content_item(item: Value) -> Value {
    let obj = match item.as_object() {
        Some(obj) => obj,
        None => return generic_normalize(item, 1),
    };
    let item_type = obj.get("type").and_then(Value::as_str).unwrap_or("");

    match item_type {
        "text" => {
            let text = obj.get("text").and_then(Value::as_str).unwrap_or("");
            serde_json::json!({ "type": "text", "text": truncate(text, TEXT_TRUNCATE_LEN).0 })
        }
        "image" | "audio" => {
            let data = obj.get("data").and_then(Value::as_str).unwrap_or("");
            let (preview, truncated) = truncate(data, DATA_PREVIEW_LEN);
            serde_json::json!({
                "type": item_type,
                "mimeType": obj.get("mimeType").cloned().unwrap_or(Value::Null),
                "dataPreview": preview,
                "estimatedBytes": base64_estimate_bytes(data),
                "dataTruncated": truncated,
            })
        }
        "resource" => normalize_resource_item(obj),
        "resource_link" => {
            let description = obj.get("description").and_then(Value::as_str).unwrap_or("");
            serde_json::json!({
                "type": "resource_link",
                "uri": obj.get("uri").cloned().unwrap_or(Value::Null),
                "name": obj.get("name").cloned().unwrap_or(Value::Null),
                "mimeType": obj.get("mimeType").cloned().unwrap_or(Value::Null),
                "description": truncate(description, TEXT_TRUNCATE_LEN).0,
            })
        }
        _ => generic_normalize(item.clone(), 1),
    }
}

fn normalize_resource_item(obj: &Map<String, Value>) -> Value {
    let resource = obj.get("resource").and_then(Value::as_object);
    let mut out = Map::new();
    out.insert(
        "uri".to_string(),
        resource.and_then(|r| r.get("uri")).cloned().unwrap_or(Value::Null),
    );
    out.insert(
        "mimeType".to_string(),
        resource.and_then(|r| r.get("mimeType")).cloned().unwrap_or(Value::Null),
    );
    if let Some(text) = resource.and_then(|r| r.get("text")).and_then(Value::as_str) {
        let (preview, truncated) = truncate(text, TEXT_TRUNCATE_LEN);
        out.insert("textPreview".to_string(), Value::String(preview));
        out.insert("textLength".to_string(), Value::from(text.chars().count()));
        out.insert("textTruncated".to_string(), Value::Bool(truncated));
    }
    if let Some(blob) = resource.and_then(|r| r.get("blob")).and_then(Value::as_str) {
        let (preview, truncated) = truncate(blob, DATA_PREVIEW_LEN);
        out.insert("blobPreview".to_string(), Value::String(preview));
        out.insert("estimatedBytes".to_string(), Value::from(base64_estimate_bytes(blob)));
        out.insert("blobTruncated".to_string(), Value::Bool(truncated));
    }
    serde_json::json!({ "type": "resource", "resource": Value::Object(out) })
}

/// The generic normalization pass: strings truncated to 4000 chars, arrays
/// capped at 40 items with a sentinel for the remainder, objects capped at
/// 60 keys with a `__truncatedKeys` counter, depth capped at 7.
fn generic_normalize(value: Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return match value {
            Value::Object(_) | Value::Array(_) => Value::String("[max_depth_reached]".to_string()),
            other => other,
        };
    }
    match value {
        Value::String(s) => Value::String(truncate(&s, TEXT_TRUNCATE_LEN).0),
        Value::Array(items) => {
            let original_len = items.len();
            let mut capped: Vec<Value> = items
                .into_iter()
                .take(ARRAY_CAP)
                .map(|v| generic_normalize(v, depth + 1))
                .collect();
            if original_len > ARRAY_CAP {
                capped.push(Value::String(format!("[{} items truncated]", original_len - ARRAY_CAP)));
            }
            Value::Array(capped)
        }
        Value::Object(map) => {
            let original_len = map.len();
            let mut out = Map::new();
            for (k, v) in map.into_iter().take(OBJECT_KEY_CAP) {
                out.insert(k, generic_normalize(v, depth + 1));
            }
            if original_len > OBJECT_KEY_CAP {
                out.insert("__truncatedKeys".to_string(), Value::from(original_len - OBJECT_KEY_CAP));
            }
            Value::Object(out)
        }
        // Numbers, bools, and null transit unchanged; serde_json has no
        // bigint or undefined variant to special-case.
        other => other,
    }
}

/// Truncates `s` to `max` characters, appending the `[truncated:{len}]`
/// sentinel when it does. Returns `(text, was_truncated)`.
fn truncate(s: &str, max: usize) -> (String, bool) {
    let original_len = s.chars().count();
    if original_len <= max {
        return (s.to_string(), false);
    }
    let kept: String = s.chars().take(max).collect();
    (format!("{kept}[truncated:{original_len}]"), true)
}

/// `floor(len * 3 / 4) - padding`, where padding is 2, 1, or 0 for trailing
/// `==`, `=`, or no padding respectively. An estimate, not an exact decode
/// — good enough for a size preview without spending a real base64 decode
/// on untrusted upstream data.
pub fn base64_estimate_bytes(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    let padding = if s.ends_with("==") {
        2
    } else if s.ends_with('=') {
        1
    } else {
        0
    };
    (s.len() * 3 / 4).saturating_sub(padding)
}

/// Wraps a successful `search()`/`execute()` result in the bit-compatible
/// shape: a text content item carrying the size-limited JSON serialization,
/// mirrored verbatim in `structuredContent.result`.
pub fn build_tool_response(result: &Value, max_result_chars: usize) -> Value {
    let text = crate::infrastructure::sandbox::serialize_with_limit(result, max_result_chars);
    serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": { "result": result },
    })
}

/// Wraps a failure from either tool into the shared `isError` envelope.
pub fn build_error_response(op: &str, message: &str) -> Value {
    serde_json::json!({
        "isError": true,
        "content": [{ "type": "text", "text": format!("{op}() failed: {message}") }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_oversized_text_content_item() {
        let value = serde_json::json!({ "content": [{ "type": "text", "text": "x".repeat(10_000) }] });
        let normalized = normalize_execute_result(value);
        let text = normalized["content"][0]["text"].as_str().unwrap();
        assert!(text.len() < 10_000);
        assert!(text.contains("truncated"));
    }

    #[test]
    fn caps_content_array_and_annotates_truncation() {
        let items: Vec<Value> = (0..50)
            .map(|i| serde_json::json!({ "type": "text", "text": format!("item {i}") }))
            .collect();
        let value = serde_json::json!({ "content": items });
        let normalized = normalize_execute_result(value);
        assert_eq!(normalized["content"].as_array().unwrap().len(), 40);
        assert_eq!(normalized["contentTruncated"], Value::Bool(true));
        assert_eq!(normalized["contentOriginalLength"], Value::from(50));
    }

    #[test]
    fn normalizes_image_item_with_byte_estimate() {
        let data = "QUJD"; // "ABC" base64, no padding
        let value = serde_json::json!({ "content": [{ "type": "image", "mimeType": "image/png", "data": data }] });
        let normalized = normalize_execute_result(value);
        let item = &normalized["content"][0];
        assert_eq!(item["type"], "image");
        assert_eq!(item["estimatedBytes"], Value::from(base64_estimate_bytes(data)));
        assert_eq!(item["dataTruncated"], Value::Bool(false));
    }

    #[test]
    fn generic_normalization_caps_arrays_objects_and_depth() {
        let mut deeply_nested = Value::String("leaf".to_string());
        for _ in 0..12 {
            deeply_nested = serde_json::json!({ "child": deeply_nested });
        }
        let normalized = generic_normalize(deeply_nested, 0);
        // Walk down until we hit the sentinel; it must appear before depth 12.
        let mut cursor = &normalized;
        let mut hit_sentinel = false;
        for _ in 0..12 {
            match cursor {
                Value::Object(map) => cursor = map.get("child").unwrap(),
                Value::String(s) if s == "[max_depth_reached]" => {
                    hit_sentinel = true;
                    break;
                }
                _ => break,
            }
        }
        assert!(hit_sentinel);
    }

    #[test]
    fn generic_normalization_caps_oversized_array() {
        let items: Vec<Value> = (0..45).map(Value::from).collect();
        let normalized = generic_normalize(Value::Array(items), 0);
        let arr = normalized.as_array().unwrap();
        assert_eq!(arr.len(), 41); // 40 kept + 1 sentinel
        assert!(arr.last().unwrap().as_str().unwrap().contains("items truncated"));
    }

    #[test]
    fn generic_normalization_caps_oversized_object() {
        let mut map = Map::new();
        for i in 0..70 {
            map.insert(format!("k{i}"), Value::from(i));
        }
        let normalized = generic_normalize(Value::Object(map), 0);
        let obj = normalized.as_object().unwrap();
        assert_eq!(obj.get("__truncatedKeys"), Some(&Value::from(10)));
    }

    #[test]
    fn base64_byte_estimate_accounts_for_padding() {
        assert_eq!(base64_estimate_bytes(""), 0);
        assert_eq!(base64_estimate_bytes("QUJD"), 3); // "ABC", no padding
        assert_eq!(base64_estimate_bytes("QQ=="), 1); // "A", double padding
    }

    #[test]
    fn error_response_matches_bit_compatible_shape() {
        let response = build_error_response("execute", "boom");
        assert_eq!(response["isError"], Value::Bool(true));
        assert_eq!(response["content"][0]["type"], "text");
        assert_eq!(response["content"][0]["text"], "execute() failed: boom");
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Catalog value objects: tool metadata as discovered from upstreams, and
//! the immutable snapshot record tying a set of tools to the sync that
//! produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A single callable tool as discovered from an upstream `list_tools` call,
/// before it is stamped with a snapshot hash and stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub annotations: Option<Value>,
}

/// A tool row as it lives in the catalog: server-qualified, carrying the
/// hash of the snapshot that last wrote it and a precomputed search blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub server_id: String,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub annotations: Option<Value>,
    pub searchable_text: String,
    pub snapshot_hash: String,
}

impl ToolRecord {
    /// Builds the lowercase search blob used by `searchTools`: name, title,
    /// description, and the JSON text of the schema and annotations,
    /// skipping empty pieces.
    pub fn build_searchable_text(descriptor: &ToolDescriptor) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(5);
        parts.push(descriptor.name.clone());
        if let Some(title) = &descriptor.title {
            if !title.is_empty() {
                parts.push(title.clone());
            }
        }
        if let Some(desc) = &descriptor.description {
            if !desc.is_empty() {
                parts.push(desc.clone());
            }
        }
        parts.push(descriptor.input_schema.to_string());
        if let Some(ann) = &descriptor.annotations {
            parts.push(ann.to_string());
        }
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn from_descriptor(server_id: &str, descriptor: ToolDescriptor, snapshot_hash: &str) -> Self {
        let searchable_text = Self::build_searchable_text(&descriptor);
        Self {
            server_id: server_id.to_string(),
            name: descriptor.name,
            title: descriptor.title,
            description: descriptor.description,
            input_schema: descriptor.input_schema,
            output_schema: descriptor.output_schema,
            annotations: descriptor.annotations,
            searchable_text,
            snapshot_hash: snapshot_hash.to_string(),
        }
    }
}

/// The payload written verbatim to a snapshot file, used only to derive the
/// snapshot hash and to provide an audit trail on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub fetched_at: DateTime<Utc>,
    pub server_id: String,
    pub tools: Vec<ToolDescriptor>,
}

impl SnapshotPayload {
    /// First 16 hex characters of the SHA-256 of the compact JSON
    /// serialization of this payload.
    pub fn compute_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).expect("snapshot payload always serializes");
        let digest = Sha256::digest(&bytes);
        let full_hex = hex_encode(&digest);
        full_hex[..16].to_string()
    }

    /// Filesystem-safe timestamp for the snapshot filename: `.` and `:`
    /// replaced with `-` in the RFC3339 representation.
    pub fn filename_timestamp(&self) -> String {
        self.fetched_at
            .to_rfc3339()
            .replace(':', "-")
            .replace('.', "-")
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

/// An immutable record of one sync run against one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub server_id: String,
    pub snapshot_hash: String,
    pub snapshot_path: String,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for `searchTools`. `limit` is clamped to `[1, 100]`
/// with a default of 30 by the catalog store, not by this struct.
#[derive(Debug, Clone, Default)]
pub struct ToolQuery {
    pub query: Option<String>,
    pub server_id: Option<String>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn searchable_text_skips_empty_fields() {
        let d = ToolDescriptor {
            name: "read_file".into(),
            title: Some(String::new()),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: None,
        };
        let text = ToolRecord::build_searchable_text(&d);
        assert!(text.contains("read_file"));
        assert!(text.contains("object"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn snapshot_hash_is_sixteen_hex_chars() {
        let payload = SnapshotPayload {
            fetched_at: Utc::now(),
            server_id: "s1".into(),
            tools: vec![],
        };
        let hash = payload.compute_hash();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn snapshot_hash_is_deterministic_for_equal_payloads() {
        let fetched_at = Utc::now();
        let a = SnapshotPayload {
            fetched_at,
            server_id: "s1".into(),
            tools: vec![],
        };
        let b = SnapshotPayload {
            fetched_at,
            server_id: "s1".into(),
            tools: vec![],
        };
        assert_eq!(a.compute_hash(), b.compute_hash());
    }
}

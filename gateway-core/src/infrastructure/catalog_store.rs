// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Durable catalog storage on top of sqlite. A file-backed relational
//! engine is the natural fit for an embedded, single-process store; the
//! query idiom (`sqlx::query(...).bind(...).fetch_*(&pool)`) mirrors the
//! rest of this codebase's repository implementations, swapped from
//! postgres onto sqlite so the gateway ships as a single binary with no
//! external database dependency.

use crate::domain::catalog::{Snapshot, ToolQuery, ToolRecord};
use crate::domain::config::{TransportConfig, UpstreamServerConfig};
use crate::domain::errors::CatalogError;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Opens (creating if absent) the sqlite database at `db_path`,
    /// creating its parent directory first.
    pub async fn open(db_path: &str) -> Result<Self, CatalogError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CatalogError::Database(e.to_string()))?;
            }
        }
        let url = format!("sqlite://{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, CatalogError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                transport_kind TEXT NOT NULL,
                config_json TEXT NOT NULL,
                last_synced_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tools (
                server_id TEXT NOT NULL,
                name TEXT NOT NULL,
                title TEXT,
                description TEXT,
                input_schema_json TEXT NOT NULL,
                output_schema_json TEXT,
                annotations_json TEXT,
                searchable_text TEXT NOT NULL,
                snapshot_hash TEXT NOT NULL,
                PRIMARY KEY (server_id, name)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                server_id TEXT NOT NULL,
                snapshot_hash TEXT NOT NULL,
                snapshot_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (server_id, snapshot_hash)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Idempotent bulk upsert by id; preserves `last_synced_at`.
    pub async fn upsert_servers(&self, configs: &[UpstreamServerConfig]) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        for cfg in configs {
            let config_json = serde_json::to_string(cfg)?;
            sqlx::query(
                r#"
                INSERT INTO servers (id, name, enabled, transport_kind, config_json, last_synced_at)
                VALUES (?, ?, ?, ?, ?, NULL)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    enabled = excluded.enabled,
                    transport_kind = excluded.transport_kind,
                    config_json = excluded.config_json
                "#,
            )
            .bind(&cfg.id)
            .bind(&cfg.name)
            .bind(cfg.enabled as i64)
            .bind(transport_kind(&cfg.transport))
            .bind(&config_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Single-row lookup by id, used by the tool proxy to check enablement
    /// and the allow-list before dispatching a call.
    pub async fn get_server(&self, server_id: &str) -> Result<Option<UpstreamServerConfig>, CatalogError> {
        let row = sqlx::query("SELECT config_json FROM servers WHERE id = ?")
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let config_json: String = row.try_get("config_json")?;
                Ok(Some(serde_json::from_str(&config_json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_servers(&self) -> Result<Vec<UpstreamServerConfig>, CatalogError> {
        let rows = sqlx::query("SELECT config_json FROM servers ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut servers = Vec::with_capacity(rows.len());
        for row in rows {
            let config_json: String = row.try_get("config_json")?;
            servers.push(serde_json::from_str(&config_json)?);
        }
        Ok(servers)
    }

    /// Atomically replaces every tool row for `server_id` with `tools`,
    /// registers the snapshot, and stamps `last_synced_at`.
    pub async fn replace_server_tools(
        &self,
        server_id: &str,
        snapshot: &Snapshot,
        tools: &[ToolRecord],
    ) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tools WHERE server_id = ?")
            .bind(server_id)
            .execute(&mut *tx)
            .await?;

        for tool in tools {
            sqlx::query(
                r#"
                INSERT INTO tools
                    (server_id, name, title, description, input_schema_json,
                     output_schema_json, annotations_json, searchable_text, snapshot_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&tool.server_id)
            .bind(&tool.name)
            .bind(&tool.title)
            .bind(&tool.description)
            .bind(tool.input_schema.to_string())
            .bind(tool.output_schema.as_ref().map(|v| v.to_string()))
            .bind(tool.annotations.as_ref().map(|v| v.to_string()))
            .bind(&tool.searchable_text)
            .bind(&tool.snapshot_hash)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO snapshots (server_id, snapshot_hash, snapshot_path, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(server_id, snapshot_hash) DO NOTHING
            "#,
        )
        .bind(&snapshot.server_id)
        .bind(&snapshot.snapshot_hash)
        .bind(&snapshot.snapshot_path)
        .bind(snapshot.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE servers SET last_synced_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(server_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn search_tools(&self, query: &ToolQuery) -> Result<Vec<ToolRecord>, CatalogError> {
        let limit = query.limit.unwrap_or(30).clamp(1, 100) as i64;

        let rows = match (&query.query, &query.server_id) {
            (Some(q), Some(sid)) => {
                sqlx::query(
                    "SELECT * FROM tools WHERE server_id = ? AND searchable_text LIKE ? \
                     ORDER BY server_id ASC, name ASC LIMIT ?",
                )
                .bind(sid)
                .bind(format!("%{}%", q.to_lowercase()))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(q), None) => {
                sqlx::query(
                    "SELECT * FROM tools WHERE searchable_text LIKE ? \
                     ORDER BY server_id ASC, name ASC LIMIT ?",
                )
                .bind(format!("%{}%", q.to_lowercase()))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(sid)) => {
                sqlx::query(
                    "SELECT * FROM tools WHERE server_id = ? ORDER BY server_id ASC, name ASC LIMIT ?",
                )
                .bind(sid)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query("SELECT * FROM tools ORDER BY server_id ASC, name ASC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(row_to_tool_record).collect()
    }

    pub async fn get_tool(&self, server_id: &str, name: &str) -> Result<Option<ToolRecord>, CatalogError> {
        let row = sqlx::query("SELECT * FROM tools WHERE server_id = ? AND name = ?")
            .bind(server_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_tool_record).transpose()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn transport_kind(transport: &TransportConfig) -> &'static str {
    transport.kind()
}

fn row_to_tool_record(row: sqlx::sqlite::SqliteRow) -> Result<ToolRecord, CatalogError> {
    let input_schema_json: String = row.try_get("input_schema_json")?;
    let output_schema_json: Option<String> = row.try_get("output_schema_json")?;
    let annotations_json: Option<String> = row.try_get("annotations_json")?;

    // Malformed rows fall back to {} / null rather than failing the query,
    // bounding the blast radius of on-disk corruption.
    let input_schema: Value =
        serde_json::from_str(&input_schema_json).unwrap_or_else(|_| serde_json::json!({}));
    let output_schema = output_schema_json.and_then(|s| serde_json::from_str(&s).ok());
    let annotations = annotations_json.and_then(|s| serde_json::from_str(&s).ok());

    Ok(ToolRecord {
        server_id: row.try_get("server_id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        input_schema,
        output_schema,
        annotations,
        searchable_text: row.try_get("searchable_text")?,
        snapshot_hash: row.try_get("snapshot_hash")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::TransportConfig;
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample_config(id: &str) -> UpstreamServerConfig {
        UpstreamServerConfig {
            id: id.to_string(),
            name: format!("{id} display"),
            enabled: true,
            allowed_tools: vec!["*".to_string()],
            transport: TransportConfig::Stdio {
                command: "true".into(),
                args: vec![],
                cwd: None,
                env: HashMap::new(),
                stderr: crate::domain::config::StderrDisposition::Null,
            },
            max_retries: 2,
            base_backoff_ms: 250,
            max_backoff_ms: 30_000,
        }
    }

    fn sample_tool(server_id: &str, name: &str, hash: &str) -> ToolRecord {
        ToolRecord {
            server_id: server_id.to_string(),
            name: name.to_string(),
            title: None,
            description: Some("a tool".into()),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: None,
            searchable_text: format!("{name} a tool object"),
            snapshot_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_servers_is_idempotent() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        let configs = vec![sample_config("s1")];
        store.upsert_servers(&configs).await.unwrap();
        store.upsert_servers(&configs).await.unwrap();
        let listed = store.list_servers().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "s1");
    }

    #[tokio::test]
    async fn replace_server_tools_is_atomic_and_queryable() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        store.upsert_servers(&[sample_config("s1")]).await.unwrap();

        let snapshot = Snapshot {
            server_id: "s1".into(),
            snapshot_hash: "abc123abc123abcd".into(),
            snapshot_path: "/tmp/s1/snap.json".into(),
            created_at: Utc::now(),
        };
        let tools = vec![
            sample_tool("s1", "read_file", &snapshot.snapshot_hash),
            sample_tool("s1", "write_file", &snapshot.snapshot_hash),
        ];
        store.replace_server_tools("s1", &snapshot, &tools).await.unwrap();

        let fetched = store.get_tool("s1", "read_file").await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().snapshot_hash, snapshot.snapshot_hash);

        let missing = store.get_tool("s1", "does_not_exist").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn search_tools_orders_deterministically_and_respects_limit() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        store.upsert_servers(&[sample_config("s1")]).await.unwrap();
        let snapshot = Snapshot {
            server_id: "s1".into(),
            snapshot_hash: "deadbeefdeadbeef".into(),
            snapshot_path: "/tmp/s1/snap.json".into(),
            created_at: Utc::now(),
        };
        let tools = vec![
            sample_tool("s1", "zzz_tool", &snapshot.snapshot_hash),
            sample_tool("s1", "aaa_tool", &snapshot.snapshot_hash),
        ];
        store.replace_server_tools("s1", &snapshot, &tools).await.unwrap();

        let results = store
            .search_tools(&ToolQuery {
                query: None,
                server_id: None,
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(results[0].name, "aaa_tool");
        assert_eq!(results[1].name, "zzz_tool");

        let limited = store
            .search_tools(&ToolQuery {
                query: None,
                server_id: None,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}

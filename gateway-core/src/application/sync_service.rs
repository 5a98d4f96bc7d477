// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pulls tool lists from upstreams, writes an immutable snapshot file per
//! run, and atomically replaces the catalog's tool rows for that server.
//! Sequential across servers — predictable upstream load beats
//! parallel fan-out for a concern this infrequent.

use crate::domain::catalog::{Snapshot, SnapshotPayload, ToolRecord};
use crate::domain::config::UpstreamServerConfig;
use crate::domain::errors::{CatalogError, UpstreamError};
use crate::infrastructure::catalog_store::CatalogStore;
use crate::infrastructure::upstream_manager::UpstreamManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to write snapshot file: {0}")]
    SnapshotWrite(String),
}

/// Outcome of syncing a single server, returned from `sync_all_servers` so
/// callers (the CLI's `sync` subcommand, tests) get one summary per server
/// without needing to re-query the catalog.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub server_id: String,
    pub snapshot_hash: String,
    pub tool_count: usize,
}

pub struct SyncService {
    catalog: Arc<CatalogStore>,
    upstream: Arc<UpstreamManager>,
    snapshot_dir: PathBuf,
}

impl SyncService {
    /// Ensures the snapshot directory exists before returning.
    pub fn new(
        catalog: Arc<CatalogStore>,
        upstream: Arc<UpstreamManager>,
        snapshot_dir: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let snapshot_dir = snapshot_dir.into();
        std::fs::create_dir_all(&snapshot_dir)?;
        Ok(Self {
            catalog,
            upstream,
            snapshot_dir,
        })
    }

    /// Syncs one server: fetch, hash, write snapshot file, atomically
    /// replace the catalog's tool rows for that server.
    pub async fn sync_server(&self, server: &UpstreamServerConfig) -> Result<SyncSummary, SyncError> {
        info!(server_id = %server.id, "sync.start");

        let tools = self.upstream.list_tools(&server.id).await?;

        let payload = SnapshotPayload {
            fetched_at: chrono::Utc::now(),
            server_id: server.id.clone(),
            tools: tools.clone(),
        };
        let snapshot_hash = payload.compute_hash();

        let server_dir = self.snapshot_dir.join(&server.id);
        std::fs::create_dir_all(&server_dir)
            .map_err(|e| SyncError::SnapshotWrite(e.to_string()))?;
        let filename = format!("{}-{}.json", payload.filename_timestamp(), snapshot_hash);
        let snapshot_path = server_dir.join(&filename);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| SyncError::SnapshotWrite(e.to_string()))?;
        std::fs::write(&snapshot_path, body).map_err(|e| SyncError::SnapshotWrite(e.to_string()))?;

        let tool_records: Vec<ToolRecord> = tools
            .into_iter()
            .map(|t| ToolRecord::from_descriptor(&server.id, t, &snapshot_hash))
            .collect();

        let snapshot = Snapshot {
            server_id: server.id.clone(),
            snapshot_hash: snapshot_hash.clone(),
            snapshot_path: snapshot_path.to_string_lossy().into_owned(),
            created_at: payload.fetched_at,
        };

        self.catalog
            .replace_server_tools(&server.id, &snapshot, &tool_records)
            .await?;

        info!(
            server_id = %server.id,
            snapshot_hash = %snapshot_hash,
            tool_count = tool_records.len(),
            "sync.complete"
        );

        Ok(SyncSummary {
            server_id: server.id.clone(),
            snapshot_hash,
            tool_count: tool_records.len(),
        })
    }

    /// Runs `sync_server` sequentially over every enabled server known to
    /// the upstream manager, in configured order. A single server's
    /// failure is returned in its own slot of the result vec rather than
    /// aborting the run.
    pub async fn sync_all_servers(&self) -> Vec<(String, Result<SyncSummary, SyncError>)> {
        let mut results = Vec::new();
        for config in self.upstream.list_server_configs() {
            if !config.enabled {
                continue;
            }
            let outcome = self.sync_server(config).await;
            if let Err(e) = &outcome {
                warn!(server_id = %config.id, error = %e, "sync.server.failed");
            }
            results.push((config.id.clone(), outcome));
        }
        results
    }

    /// Spawns a periodic background tick running `sync_all_servers` every
    /// `interval_seconds` (floored to 10s). The returned handle can be
    /// aborted to stop the scheduler; a rejected tick is logged and never
    /// terminates the loop. Overlapping ticks are not prevented — each
    /// `replace_server_tools` transaction is independently safe to
    /// interleave with a live read or another sync.
    pub fn start_interval_sync(self: Arc<Self>, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        let interval_seconds = interval_seconds.max(10);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                let results = self.sync_all_servers().await;
                for (server_id, result) in results {
                    if let Err(e) = result {
                        error!(server_id = %server_id, error = %e, "sync.interval.failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{StderrDisposition, TransportConfig};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn bogus_config(id: &str) -> UpstreamServerConfig {
        UpstreamServerConfig {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            allowed_tools: vec!["*".to_string()],
            transport: TransportConfig::Stdio {
                command: "/no/such/binary-sync-test".into(),
                args: vec![],
                cwd: None,
                env: HashMap::new(),
                stderr: StderrDisposition::Null,
            },
            max_retries: 0,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn sync_server_surfaces_upstream_failure_without_writing_snapshot() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(CatalogStore::open_in_memory().await.unwrap());
        let config = bogus_config("s1");
        let upstream = Arc::new(UpstreamManager::new(vec![config.clone()]).unwrap());
        let service = SyncService::new(catalog.clone(), upstream, dir.path().join("snapshots")).unwrap();

        let result = service.sync_server(&config).await;
        assert!(result.is_err());
        assert!(catalog.get_tool("s1", "anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_all_servers_skips_disabled_servers() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(CatalogStore::open_in_memory().await.unwrap());
        let mut disabled = bogus_config("s2");
        disabled.enabled = false;
        let upstream = Arc::new(UpstreamManager::new(vec![disabled]).unwrap());
        let service = SyncService::new(catalog, upstream, dir.path().join("snapshots")).unwrap();

        let results = service.sync_all_servers().await;
        assert!(results.is_empty());
    }
}

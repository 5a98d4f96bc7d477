// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The config file loader named as an external collaborator by the core
//! design: a Kubernetes-manifest-flavored YAML document
//! (`apiVersion`/`kind`/`metadata`/`spec`) consistent with this codebase's
//! other node-facing configuration documents. The core never parses YAML
//! itself — this module builds the core's typed inputs
//! (`UpstreamServerConfig`, catalog/sandbox/sync settings) from the
//! manifest and hands them over.

use anyhow::{bail, Context, Result};
use gateway_core::domain::config::UpstreamServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const API_VERSION: &str = "100monkeys.ai/v1";
const KIND: &str = "ToolGateConfig";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: GatewaySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySpec {
    #[serde(default)]
    pub upstreams: Vec<UpstreamServerConfig>,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

fn default_db_path() -> String {
    "./toolgate-data/catalog.sqlite".to_string()
}

fn default_snapshot_dir() -> String {
    "./toolgate-data/snapshots".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_code_length: default_max_code_length(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_code_length() -> usize {
    20_000
}

fn default_max_result_chars() -> usize {
    20_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
        }
    }
}

fn default_interval_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl GatewayManifest {
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            bail!("invalid apiVersion: '{}', expected '{API_VERSION}'", self.api_version);
        }
        if self.kind != KIND {
            bail!("invalid kind: '{}', expected '{KIND}'", self.kind);
        }
        Ok(())
    }

    fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file at {}", path.display()))?;
        let manifest: GatewayManifest =
            serde_yaml::from_str(&text).with_context(|| format!("parsing config file at {}", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn empty_default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "default".to_string(),
                version: None,
            },
            spec: GatewaySpec {
                upstreams: Vec::new(),
                catalog: CatalogSettings::default(),
                sandbox: SandboxSettings::default(),
                sync: SyncSettings::default(),
                observability: ObservabilitySettings::default(),
            },
        }
    }

    /// Discovery precedence: explicit CLI flag -> `TOOLGATE_CONFIG_PATH` env
    /// var -> `./toolgate.yaml` -> `~/.toolgate/config.yaml`. A missing file
    /// at an explicit path is fatal; discovery failure falls back to an
    /// empty manifest with a warning.
    pub fn load(cli_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!(path = %path.display(), "loading config from explicit path");
            return Self::from_yaml_file(&path);
        }

        if let Ok(path) = std::env::var("TOOLGATE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                tracing::info!(path = %path.display(), "loading config from TOOLGATE_CONFIG_PATH");
                return Self::from_yaml_file(&path);
            }
        }

        let cwd_path = PathBuf::from("./toolgate.yaml");
        if cwd_path.exists() {
            tracing::info!(path = %cwd_path.display(), "loading config from working directory");
            return Self::from_yaml_file(&cwd_path);
        }

        if let Some(home) = dirs_next::home_dir() {
            let home_path = home.join(".toolgate").join("config.yaml");
            if home_path.exists() {
                tracing::info!(path = %home_path.display(), "loading config from home directory");
                return Self::from_yaml_file(&home_path);
            }
        }

        tracing::warn!("no config file found in standard locations; using empty defaults");
        Ok(Self::empty_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_kind() {
        let mut manifest = GatewayManifest::empty_default();
        manifest.kind = "SomethingElse".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_manifest() {
        let manifest = GatewayManifest::empty_default();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn parses_minimal_yaml_document() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: ToolGateConfig
metadata:
  name: local
spec:
  upstreams: []
"#;
        let manifest: GatewayManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.catalog.db_path, default_db_path());
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-component error enums. Each maps one-to-one onto an error kind in the
//! design's error table; `anyhow` is reserved for the CLI boundary where
//! errors are only ever displayed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Serialization(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("server is disabled: {0}")]
    ServerDisabled(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server name is invalid: {0}")]
    InvalidServerName(String),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("server is disabled: {0}")]
    ServerDisabled(String),
    #[error("tool '{tool}' is not permitted on server '{server_id}'")]
    ToolNotAllowed { server_id: String, tool: String },
    #[error("tool '{tool}' not found on server '{server_id}'")]
    ToolNotFound { server_id: String, tool: String },
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("code must be non-empty and at most {max} characters")]
    CodeTooLarge { max: usize },
    #[error("code execution timed out after {0}ms")]
    Timeout(u64),
    #[error("sandbox evaluation error: {0}")]
    Evaluation(String),
    #[error("host bridge call failed: {0}")]
    BridgeCall(String),
}

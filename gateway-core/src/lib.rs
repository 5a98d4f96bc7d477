// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # gateway-core
//!
//! Runtime heart of the tool gateway. Owns the catalog of upstream MCP servers
//! and their tools, the connection lifecycle for each upstream, the scheduled
//! and on-demand synchronization of tool metadata, the authorization/validation
//! path for a single tool call, and the sandboxed runtime that executes
//! model-supplied code snippets against a curated host bridge.
//!
//! ## Components
//!
//! | Component | Domain/application files | Infra files |
//! |---|---|---|
//! | **Catalog Store** | [`domain::catalog`] | [`infrastructure::catalog_store`] |
//! | **Upstream Manager** | [`domain::config`], [`domain::health`] | [`infrastructure::upstream_manager`] |
//! | **Sync Service** | — | [`application::sync_service`] |
//! | **Tool Proxy** | — | [`application::tool_proxy`] |
//! | **Sandbox Runtime** | — | [`infrastructure::sandbox`] |
//! | **Model Tools** (`search`/`execute`) | — | [`application::model_tools`] |
//!
//! ## Layer Structure
//!
//! ```text
//! application/    ← Sync Service, Tool Proxy, Model Tools: orchestrate domain + infrastructure
//!     ↓
//! domain/         ← Configs, tool records, snapshots, health state, error kinds
//!     ↓
//! infrastructure/ ← sqlite catalog, rmcp upstream transports, rquickjs sandbox
//! ```
//!
//! `normalize` shapes `execute()` results before [`application::model_tools`]
//! hands them back to a model; it lives at the crate root rather than under
//! `application/` so both the proxy and the model tools can reach it without
//! a layering cycle.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod normalize;

pub use domain::*;

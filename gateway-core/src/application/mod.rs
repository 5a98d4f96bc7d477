// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Use-cases that orchestrate the catalog store and upstream manager:
//! scheduled/on-demand synchronization and authorized tool invocation.

pub mod model_tools;
pub mod sync_service;
pub mod tool_proxy;

pub use model_tools::ModelTools;
pub use sync_service::SyncService;
pub use tool_proxy::ToolProxy;

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! sqlite-backed catalog storage, rmcp-backed upstream transports, and the
//! rquickjs sandbox runtime.

pub mod catalog_store;
pub mod sandbox;
pub mod upstream_manager;

pub use catalog_store::CatalogStore;
pub use sandbox::SandboxRuntime;
pub use upstream_manager::UpstreamManager;

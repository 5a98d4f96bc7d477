// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory health bookkeeping for a single upstream server.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Derived status for a health snapshot. Disabled overrides everything
/// else; down is sticky until the next success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Disabled,
    Healthy,
    Degraded,
    Down,
}

/// A point-in-time view of one server's health, safe to serialize and
/// hand back to an operator.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub server_id: String,
    pub transport_kind: String,
    pub enabled: bool,
    pub connected: bool,
    pub status: ServerStatus,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub consecutive_failures: u32,
    pub restarts: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_retry_at_ms: Option<i64>,
}

/// Mutable per-server health counters, updated by the Upstream Manager on
/// every call and connection event. Fields are atomics so a snapshot can be
/// read without locking while concurrent operations update counters.
#[derive(Debug)]
pub struct ServerHealthState {
    pub server_id: String,
    pub transport_kind: String,
    pub enabled: bool,
    connected: AtomicBool,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    consecutive_failures: AtomicU32,
    restarts: AtomicU32,
    last_error: parking_lot::RwLock<Option<String>>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_success_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_failure_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    next_retry_at_ms: AtomicI64,
}

const NO_RETRY_SCHEDULED: i64 = 0;

impl ServerHealthState {
    pub fn new(server_id: impl Into<String>, transport_kind: impl Into<String>, enabled: bool) -> Self {
        Self {
            server_id: server_id.into(),
            transport_kind: transport_kind.into(),
            enabled,
            connected: AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            restarts: AtomicU32::new(0),
            last_error: parking_lot::RwLock::new(None),
            last_connected_at: parking_lot::RwLock::new(None),
            last_success_at: parking_lot::RwLock::new(None),
            last_failure_at: parking_lot::RwLock::new(None),
            next_retry_at_ms: AtomicI64::new(NO_RETRY_SCHEDULED),
        }
    }

    pub fn record_call_start(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        *self.last_connected_at.write() = Some(Utc::now());
    }

    pub fn record_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_error.write() = None;
        self.next_retry_at_ms.store(NO_RETRY_SCHEDULED, Ordering::Relaxed);
        *self.last_success_at.write() = Some(Utc::now());
    }

    /// Records one failed attempt (of possibly several within a single
    /// retried operation) and returns the new `consecutiveFailures` count,
    /// which the caller uses to compute the next backoff delay. Does not
    /// touch `failedCalls` — an operation that retries three times before
    /// giving up is still exactly one failed *call*, tracked separately via
    /// [`record_failed_call`](Self::record_failed_call).
    pub fn record_attempt_failure(&self, error: impl Into<String>) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_error.write() = Some(error.into());
        *self.last_failure_at.write() = Some(Utc::now());
        failures
    }

    /// Records that the operation as a whole failed, once all retry
    /// attempts have been exhausted. Pairs with `record_call_start` so
    /// `successfulCalls + failedCalls <= totalCalls` always holds.
    pub fn record_failed_call(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self, next_retry_at_ms: i64) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.next_retry_at_ms.store(next_retry_at_ms, Ordering::Relaxed);
    }

    pub fn next_retry_at_ms(&self) -> Option<i64> {
        match self.next_retry_at_ms.load(Ordering::Relaxed) {
            NO_RETRY_SCHEDULED => None,
            ms => Some(ms),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let consecutive_failures = self.consecutive_failures();
        let connected = self.connected.load(Ordering::Relaxed);
        let status = if !self.enabled {
            ServerStatus::Disabled
        } else if consecutive_failures >= 3 {
            ServerStatus::Down
        } else if connected && consecutive_failures == 0 {
            ServerStatus::Healthy
        } else {
            ServerStatus::Degraded
        };

        HealthSnapshot {
            server_id: self.server_id.clone(),
            transport_kind: self.transport_kind.clone(),
            enabled: self.enabled,
            connected,
            status,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            consecutive_failures,
            restarts: self.restarts.load(Ordering::Relaxed),
            last_error: self.last_error.read().clone(),
            last_connected_at: *self.last_connected_at.read(),
            last_success_at: *self.last_success_at.read(),
            last_failure_at: *self.last_failure_at.read(),
            next_retry_at_ms: self.next_retry_at_ms(),
        }
    }
}

/// `clamp(baseBackoff * 2^(consecutiveFailures - 1), <= maxBackoff)`.
pub fn compute_backoff_ms(consecutive_failures: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> u64 {
    if consecutive_failures == 0 {
        return 0;
    }
    let exponent = consecutive_failures.saturating_sub(1).min(32);
    let delay = base_backoff_ms.saturating_mul(1u64 << exponent);
    delay.min(max_backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_server_reports_disabled_status_regardless_of_counters() {
        let state = ServerHealthState::new("s1", "stdio", false);
        let snap = state.snapshot();
        assert_eq!(snap.status, ServerStatus::Disabled);
        assert!(!snap.enabled);
        assert_eq!(snap.total_calls, 0);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let state = ServerHealthState::new("s1", "stdio", true);
        state.record_attempt_failure("boom");
        state.record_attempt_failure("boom again");
        assert_eq!(state.consecutive_failures(), 2);
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.snapshot().last_error, None);
    }

    #[test]
    fn three_consecutive_failures_marks_down() {
        let state = ServerHealthState::new("s1", "stdio", true);
        state.record_attempt_failure("1");
        state.record_attempt_failure("2");
        let failures = state.record_attempt_failure("3");
        assert_eq!(failures, 3);
        assert_eq!(state.snapshot().status, ServerStatus::Down);
    }

    #[test]
    fn failed_call_is_counted_once_per_operation_regardless_of_attempts() {
        let state = ServerHealthState::new("s1", "stdio", true);
        state.record_call_start();
        state.record_attempt_failure("attempt 1");
        state.record_attempt_failure("attempt 2");
        state.record_failed_call();
        let snap = state.snapshot();
        assert_eq!(snap.total_calls, 1);
        assert_eq!(snap.failed_calls, 1);
        assert!(snap.successful_calls + snap.failed_calls <= snap.total_calls);
    }

    #[test]
    fn backoff_is_monotonic_and_bounded() {
        let base = 100;
        let max = 1000;
        let mut prev = 0;
        for failures in 1..=10 {
            let delay = compute_backoff_ms(failures, base, max);
            assert!(delay >= prev);
            assert!(delay <= max);
            prev = delay;
        }
        assert_eq!(compute_backoff_ms(1, base, max), base);
    }
}

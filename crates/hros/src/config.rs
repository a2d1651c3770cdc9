// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport configuration - single source of truth.
//!
//! Centralizes every tunable of the transport and registration layers.
//! **NEVER hardcode these elsewhere!**
//!
//! Two levels:
//! - Compile-time defaults (the constants below, matching the reference
//!   protocol behavior).
//! - [`TransportConfig`], populated from the defaults and optionally
//!   overridden by `HROS_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

// =======================================================================
// Queues
// =======================================================================

/// Default capacity of the bounded eviction queues (messages/frames).
///
/// When full, the oldest entry is overwritten. Freshness over
/// completeness: stale telemetry is worthless.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

// =======================================================================
// TCP
// =======================================================================

/// Outbound connect timeout (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Base delay before the first reconnect attempt (milliseconds).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Multiplier applied to the reconnect delay after each failed attempt.
pub const RECONNECT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound on the reconnect delay (milliseconds).
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Random jitter added to each reconnect delay (milliseconds, 0..=N).
pub const RECONNECT_JITTER_MS: u64 = 250;

/// Interval at which blocking accept loops poll the cancel flag
/// (milliseconds).
pub const ACCEPT_POLL_INTERVAL_MS: u64 = 25;

// =======================================================================
// Wire limits
// =======================================================================

/// Maximum accepted connection-header length in bytes.
///
/// Headers carry the full message definition text, which can run to
/// hundreds of kilobytes for deeply nested types.
pub const MAX_HEADER_LEN: usize = 4 * 1024 * 1024;

/// Maximum accepted message-frame payload length in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// =======================================================================
// Registration
// =======================================================================

/// Delay between registration retry attempts (milliseconds).
pub const DEFAULT_REGISTRATION_RETRY_DELAY_MS: u64 = 500;

// =======================================================================
// Lifecycle
// =======================================================================

/// Bounded wait for loops and channel groups to wind down on shutdown
/// (milliseconds).
pub const DEFAULT_SHUTDOWN_WAIT_MS: u64 = 5_000;

/// Worker threads in the shared task executor.
pub const DEFAULT_EXECUTOR_THREADS: usize = 4;

/// Runtime configuration for the transport layer.
///
/// Built from the compile-time defaults; [`TransportConfig::from_env`]
/// additionally honors `HROS_*` environment overrides. Cheap to clone,
/// passed by value into the components that need it.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Capacity of the bounded eviction queues.
    pub queue_capacity: usize,
    /// Outbound connect timeout.
    pub connect_timeout: Duration,
    /// Base reconnect delay (exponential back-off starts here).
    pub reconnect_base_delay: Duration,
    /// Cap on the reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Jitter added to each reconnect delay.
    pub reconnect_jitter: Duration,
    /// Delay between registration retries.
    pub registration_retry_delay: Duration,
    /// Bounded shutdown wait for loops and channel groups.
    pub shutdown_wait: Duration,
    /// Worker threads in the shared task executor.
    pub executor_threads: usize,
    /// Maximum accepted connection-header length.
    pub max_header_len: usize,
    /// Maximum accepted message-frame payload length.
    pub max_frame_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(MAX_RECONNECT_DELAY_MS),
            reconnect_jitter: Duration::from_millis(RECONNECT_JITTER_MS),
            registration_retry_delay: Duration::from_millis(DEFAULT_REGISTRATION_RETRY_DELAY_MS),
            shutdown_wait: Duration::from_millis(DEFAULT_SHUTDOWN_WAIT_MS),
            executor_threads: DEFAULT_EXECUTOR_THREADS,
            max_header_len: MAX_HEADER_LEN,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl TransportConfig {
    /// Defaults with `HROS_*` environment overrides applied.
    ///
    /// Recognized variables (all optional):
    /// `HROS_QUEUE_CAPACITY`, `HROS_CONNECT_TIMEOUT_MS`,
    /// `HROS_RECONNECT_DELAY_MS`, `HROS_RECONNECT_MAX_DELAY_MS`,
    /// `HROS_REGISTRATION_RETRY_MS`, `HROS_SHUTDOWN_WAIT_MS`,
    /// `HROS_EXECUTOR_THREADS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("HROS_QUEUE_CAPACITY") {
            config.queue_capacity = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("HROS_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("HROS_RECONNECT_DELAY_MS") {
            config.reconnect_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("HROS_RECONNECT_MAX_DELAY_MS") {
            config.reconnect_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("HROS_REGISTRATION_RETRY_MS") {
            config.registration_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("HROS_SHUTDOWN_WAIT_MS") {
            config.shutdown_wait = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("HROS_EXECUTOR_THREADS") {
            config.executor_threads = v.max(1);
        }
        config
    }

    /// Override the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Override the reconnect base delay.
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Override the outbound connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the registration retry delay.
    pub fn with_registration_retry_delay(mut self, delay: Duration) -> Self {
        self.registration_retry_delay = delay;
        self
    }
}

/// Parse an environment variable, logging and ignoring invalid values.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("[CONFIG] Ignoring invalid {}={:?}", key, raw);
                None
            }
        },
        Err(_) => None,
    }
}

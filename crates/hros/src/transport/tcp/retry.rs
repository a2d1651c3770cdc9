// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect policy for client connections.
//!
//! Distinguishes an unplanned channel closure (peer died, network fault)
//! from a deliberate disconnect. Only the former produces a reconnect plan;
//! a deliberate disconnect must be announced through
//! [`RetryingConnectionHandler::disconnect_requested`] before the socket is
//! closed, so the close handler stays quiet.
//!
//! ```text
//! connect_requested --> [reconnect = true]
//!        |
//!        v
//!   channel_closed --(reconnect)--> ReconnectPlan { remote, delay, attempt }
//!        |
//!        '--(disconnect_requested beforehand)--> no plan
//! ```
//!
//! Delays grow exponentially from the configured base up to a cap, with a
//! small random jitter so a herd of subscribers does not reconnect in
//! lockstep. Attempts are unbounded; the owner stops them by requesting a
//! disconnect.

use crate::config::{TransportConfig, RECONNECT_BACKOFF_MULTIPLIER};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

// ============================================================================
// Back-off policy
// ============================================================================

/// Exponential back-off schedule with jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max: Duration,
    /// Random jitter added on top, `0..=jitter`.
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            base: config.reconnect_base_delay,
            max: config.reconnect_max_delay,
            jitter: config.reconnect_jitter,
        }
    }

    /// Constant delay with no jitter. Deterministic spacing for tests.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let factor = RECONNECT_BACKOFF_MULTIPLIER.powi(attempt.min(32) as i32);
        let mut delay_ms = ((base_ms as f64) * factor).min(max_ms as f64) as u64;
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay_ms += fastrand::u64(0..=jitter_ms);
        }
        Duration::from_millis(delay_ms)
    }
}

// ============================================================================
// Retrying connection handler
// ============================================================================

/// One scheduled reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPlan {
    /// Address last successfully requested.
    pub remote: SocketAddr,
    /// Wait before dialing.
    pub delay: Duration,
    /// Zero-based attempt number since the last successful connect.
    pub attempt: u32,
}

/// Per-connection reconnect state machine.
pub struct RetryingConnectionHandler {
    reconnect: AtomicBool,
    attempt: AtomicU32,
    remote: Mutex<Option<SocketAddr>>,
    policy: BackoffPolicy,
}

impl RetryingConnectionHandler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            reconnect: AtomicBool::new(true),
            attempt: AtomicU32::new(0),
            remote: Mutex::new(None),
            policy,
        }
    }

    /// Record an intentional connect to `remote` and re-arm reconnection.
    pub fn connect_requested(&self, remote: SocketAddr) {
        *self.remote.lock() = Some(remote);
        self.reconnect.store(true, Ordering::Release);
    }

    /// A connect attempt succeeded. Resets the back-off schedule.
    pub fn connected(&self) {
        self.attempt.store(0, Ordering::Release);
    }

    /// Announce a deliberate disconnect. Must run before the socket close
    /// so the close handler does not schedule a reconnect.
    pub fn disconnect_requested(&self) {
        self.reconnect.store(false, Ordering::Release);
    }

    /// The channel closed. Returns the reconnect plan, or `None` after a
    /// deliberate disconnect (or when no remote was ever requested).
    pub fn channel_closed(&self) -> Option<ReconnectPlan> {
        if !self.reconnect.load(Ordering::Acquire) {
            log::debug!("[RETRY] channel closed deliberately, not reconnecting");
            return None;
        }
        let remote = (*self.remote.lock())?;
        let attempt = self.attempt.fetch_add(1, Ordering::AcqRel);
        let delay = self.policy.delay_for(attempt);
        log::debug!(
            "[RETRY] channel to {} closed, reconnect attempt {} in {:?}",
            remote,
            attempt,
            delay
        );
        Some(ReconnectPlan {
            remote,
            delay,
            attempt,
        })
    }

    /// Whether an unplanned close would currently schedule a reconnect.
    pub fn will_reconnect(&self) -> bool {
        self.reconnect.load(Ordering::Acquire)
    }

    /// Address of the last requested connect.
    pub fn remote(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }
}

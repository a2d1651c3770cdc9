// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concurrency primitives shared by the transport and registration layers.
//!
//! # Modules
//!
//! - `eviction_queue` - Bounded FIFO that evicts the oldest entry when full
//! - `executor` - Named worker pool with immediate and delayed task submission
//! - `cancellable_loop` - Dedicated-thread loop with idempotent cancellation
//! - `listener_group` - Event fan-out to registered listeners via the executor
//!
//! Everything here is blocking-thread based. Loops own their thread, queues
//! park consumers on a condvar, and cancellation always has a concrete
//! unblocking story (closing the queue or socket the loop waits on).

pub mod cancellable_loop;
pub mod eviction_queue;
pub mod executor;
pub mod listener_group;

pub use cancellable_loop::{CancellableLoop, LoopState};
pub use eviction_queue::{BoundedEvictionQueue, QueueStats};
pub use executor::TaskExecutor;
pub use listener_group::ListenerGroup;

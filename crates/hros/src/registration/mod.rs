// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master registration of this node's endpoints.
//!
//! The master is the directory every node registers with: publishers,
//! subscribers, and services announce themselves so peers can find each
//! other. This module keeps those announcements in sync and survives a
//! master that is temporarily unreachable.
//!
//! # Modules
//!
//! - `master` - Response status model and the remote call surface
//! - `registrar` - Per-endpoint state machine with retry and listeners

/// Master call surface and response status model.
pub mod master;
/// Endpoint registration state machine and retry policy.
pub mod registrar;

pub use master::{MasterClient, Response, StatusCode};
pub use registrar::{
    Registrar, RegistrarStats, Registration, RegistrationListener, RegistrationState,
};

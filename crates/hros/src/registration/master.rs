// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master API surface used for registration.
//!
//! The master answers every call with a status triple: an integer code, a
//! human-readable message, and a call-specific value. A non-positive code
//! is a normal outcome to report or retry, not a local error; `Err` is
//! reserved for failures of the call itself (the master unreachable, a
//! malformed reply).
//!
//! [`MasterClient`] is the seam the registrar talks through. The wire
//! mechanics behind it are a collaborator concern; tests substitute an
//! in-process implementation.

use crate::error::Result;
use std::fmt;

/// Status code of a master response. Positive means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const ERROR: StatusCode = StatusCode(-1);
    pub const FAILURE: StatusCode = StatusCode(0);
    pub const SUCCESS: StatusCode = StatusCode(1);

    pub fn is_success(self) -> bool {
        self.0 > 0
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            -1 => write!(f, "ERROR"),
            0 => write!(f, "FAILURE"),
            1 => write!(f, "SUCCESS"),
            other => write!(f, "STATUS({})", other),
        }
    }
}

/// One master reply: status code, status message, and the call's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T> {
    pub code: StatusCode,
    pub message: String,
    pub value: T,
}

impl<T> Response<T> {
    pub fn success(message: &str, value: T) -> Self {
        Self {
            code: StatusCode::SUCCESS,
            message: message.to_string(),
            value,
        }
    }

    pub fn failure(message: &str, value: T) -> Self {
        Self {
            code: StatusCode::FAILURE,
            message: message.to_string(),
            value,
        }
    }

    pub fn error(message: &str, value: T) -> Self {
        Self {
            code: StatusCode::ERROR,
            message: message.to_string(),
            value,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Replace the value, keeping code and message.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Response<U> {
        Response {
            code: self.code,
            message: self.message,
            value: f(self.value),
        }
    }
}

/// Registration calls a node makes against the master.
///
/// `caller_api` is the node's own advertised endpoint URL; the master
/// hands it to peers so they can reach this node. Register calls return
/// the current peer endpoints for the topic (subscribers for a publisher
/// registration, publishers for a subscriber registration); unregister
/// calls return the number of registrations removed.
pub trait MasterClient: Send + Sync {
    fn register_publisher(
        &self,
        caller_id: &str,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Response<Vec<String>>>;

    fn unregister_publisher(
        &self,
        caller_id: &str,
        topic: &str,
        caller_api: &str,
    ) -> Result<Response<i32>>;

    fn register_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Response<Vec<String>>>;

    fn unregister_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
        caller_api: &str,
    ) -> Result<Response<i32>>;

    fn register_service(
        &self,
        caller_id: &str,
        service: &str,
        service_api: &str,
        caller_api: &str,
    ) -> Result<Response<()>>;

    fn unregister_service(
        &self,
        caller_id: &str,
        service: &str,
        service_api: &str,
    ) -> Result<Response<i32>>;
}

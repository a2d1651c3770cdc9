// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Keeps the master's view of this node in sync with its endpoints.
//!
//! Every local publisher, subscriber, and service is tracked as one
//! entry with a small state machine:
//!
//! ```text
//!   UNREGISTERED ---added---> PENDING ---call ok---> REGISTERED
//!                              |  ^                      |
//!                    call fail |  | retry            removed
//!                              v  | (retryDelay)         |
//!                            FAILED               (entry dropped)
//! ```
//!
//! Registration calls run on the executor, never on the thread that
//! added the endpoint. A failed registration is retried on a fixed delay
//! until it succeeds, the endpoint is removed, or the registrar shuts
//! down. Unregistration is attempted once; the local endpoint is gone
//! whether or not the master heard about it.
//!
//! Listeners observe outcomes asynchronously. A subscriber-side listener
//! receives the publisher endpoints the master returned and typically
//! feeds them to its connection manager.

use crate::concurrent::{ListenerGroup, TaskExecutor};
use crate::registration::master::{MasterClient, Response};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Entry state
// ============================================================================

/// Master-side lifecycle of one tracked endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Pending,
    Registered,
    Failed,
}

impl RegistrationState {
    pub fn is_registered(self) -> bool {
        self == RegistrationState::Registered
    }

    pub fn is_pending(self) -> bool {
        self == RegistrationState::Pending
    }

    pub fn is_failed(self) -> bool {
        self == RegistrationState::Failed
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "UNREGISTERED"),
            RegistrationState::Pending => write!(f, "PENDING"),
            RegistrationState::Registered => write!(f, "REGISTERED"),
            RegistrationState::Failed => write!(f, "FAILED"),
        }
    }
}

/// One endpoint as the master sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Registration {
    Publisher { topic: String, topic_type: String },
    Subscriber { topic: String, topic_type: String },
    Service { name: String, service_api: String },
}

impl Registration {
    fn key(&self) -> String {
        match self {
            Registration::Publisher { topic, .. } => format!("publisher:{}", topic),
            Registration::Subscriber { topic, .. } => format!("subscriber:{}", topic),
            Registration::Service { name, .. } => format!("service:{}", name),
        }
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Publisher { topic, .. } => write!(f, "publisher of '{}'", topic),
            Registration::Subscriber { topic, .. } => write!(f, "subscriber to '{}'", topic),
            Registration::Service { name, .. } => write!(f, "service '{}'", name),
        }
    }
}

/// Observer of registration outcomes. All methods default to no-ops.
pub trait RegistrationListener: Send + Sync {
    /// The master accepted the registration. `peer_apis` holds the
    /// counterpart endpoints it returned: subscribers for a publisher
    /// registration, publishers for a subscriber registration.
    fn on_registration_success(&self, _registration: &Registration, _peer_apis: &[String]) {}

    fn on_registration_failure(&self, _registration: &Registration) {}

    fn on_unregistration_success(&self, _registration: &Registration) {}

    fn on_unregistration_failure(&self, _registration: &Registration) {}
}

/// Counters for the registrar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrarStats {
    /// Remote registration calls issued, retries included.
    pub attempts: u64,
    /// Registration calls that did not end in success.
    pub failures: u64,
}

// ============================================================================
// Registrar
// ============================================================================

/// Registration bookkeeping for one node.
pub struct Registrar {
    caller_id: String,
    caller_api: String,
    master: Arc<dyn MasterClient>,
    executor: TaskExecutor,
    entries: DashMap<String, RegistrationState>,
    listeners: ListenerGroup<dyn RegistrationListener>,
    retry_delay: Mutex<Duration>,
    shut_down: AtomicBool,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl Registrar {
    /// `caller_api` is this node's advertised endpoint, handed to the
    /// master on every call.
    pub fn new(
        caller_id: &str,
        caller_api: &str,
        master: Arc<dyn MasterClient>,
        executor: TaskExecutor,
        retry_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            caller_id: caller_id.to_string(),
            caller_api: caller_api.to_string(),
            master,
            listeners: ListenerGroup::new(executor.clone()),
            executor,
            entries: DashMap::new(),
            retry_delay: Mutex::new(retry_delay),
            shut_down: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistrationListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RegistrationListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Spacing between retries of a failed registration.
    pub fn set_retry_delay(&self, delay: Duration) {
        *self.retry_delay.lock() = delay;
    }

    pub fn retry_delay(&self) -> Duration {
        *self.retry_delay.lock()
    }

    // ------------------------------------------------------------------
    // Endpoint lifecycle
    // ------------------------------------------------------------------

    pub fn publisher_added(self: &Arc<Self>, topic: &str, topic_type: &str) {
        self.register(Registration::Publisher {
            topic: topic.to_string(),
            topic_type: topic_type.to_string(),
        });
    }

    pub fn publisher_removed(self: &Arc<Self>, topic: &str, topic_type: &str) {
        self.unregister(Registration::Publisher {
            topic: topic.to_string(),
            topic_type: topic_type.to_string(),
        });
    }

    pub fn subscriber_added(self: &Arc<Self>, topic: &str, topic_type: &str) {
        self.register(Registration::Subscriber {
            topic: topic.to_string(),
            topic_type: topic_type.to_string(),
        });
    }

    pub fn subscriber_removed(self: &Arc<Self>, topic: &str, topic_type: &str) {
        self.unregister(Registration::Subscriber {
            topic: topic.to_string(),
            topic_type: topic_type.to_string(),
        });
    }

    pub fn service_added(self: &Arc<Self>, name: &str, service_api: &str) {
        self.register(Registration::Service {
            name: name.to_string(),
            service_api: service_api.to_string(),
        });
    }

    pub fn service_removed(self: &Arc<Self>, name: &str, service_api: &str) {
        self.unregister(Registration::Service {
            name: name.to_string(),
            service_api: service_api.to_string(),
        });
    }

    /// Current state of an endpoint; `Unregistered` when untracked.
    pub fn registration_state(&self, registration: &Registration) -> RegistrationState {
        self.entries
            .get(&registration.key())
            .map(|entry| *entry.value())
            .unwrap_or(RegistrationState::Unregistered)
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> RegistrarStats {
        RegistrarStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop talking to the master.
    ///
    /// Later add/remove calls report failure to listeners without any
    /// remote call, and pending retries stop. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[REGISTRAR] shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Registration machinery
    // ------------------------------------------------------------------

    fn register(self: &Arc<Self>, registration: Registration) {
        if self.is_shut_down() {
            log::warn!("[REGISTRAR] ignoring {} added after shutdown", registration);
            self.entries
                .insert(registration.key(), RegistrationState::Failed);
            self.notify_registration_failure(registration);
            return;
        }
        log::debug!("[REGISTRAR] {} pending registration", registration);
        self.entries
            .insert(registration.key(), RegistrationState::Pending);
        let registrar = Arc::clone(self);
        self.executor
            .execute(move || registrar.attempt_registration(registration));
    }

    fn unregister(self: &Arc<Self>, registration: Registration) {
        let was_tracked = self.entries.remove(&registration.key()).is_some();
        if self.is_shut_down() {
            log::warn!(
                "[REGISTRAR] ignoring {} removed after shutdown",
                registration
            );
            self.notify_unregistration_failure(registration);
            return;
        }
        if !was_tracked {
            log::debug!("[REGISTRAR] removal of untracked {}", registration);
        }
        let registrar = Arc::clone(self);
        self.executor
            .execute(move || registrar.attempt_unregistration(registration));
    }

    /// One remote registration call. Runs on an executor worker.
    fn attempt_registration(self: &Arc<Self>, registration: Registration) {
        if self.is_shut_down() {
            self.mark(&registration, RegistrationState::Failed);
            self.notify_registration_failure(registration);
            return;
        }
        if !self.entries.contains_key(&registration.key()) {
            log::debug!("[REGISTRAR] dropping retry for removed {}", registration);
            return;
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let reason = match self.call_register(&registration) {
            Ok(response) if response.is_success() => {
                self.mark(&registration, RegistrationState::Registered);
                log::info!("[REGISTRAR] {} registered", registration);
                let peer_apis = response.value;
                self.listeners.signal(move |listener| {
                    listener.on_registration_success(&registration, &peer_apis)
                });
                return;
            }
            Ok(response) => format!("{}: {}", response.code, response.message),
            Err(e) => e.to_string(),
        };
        self.failures.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "[REGISTRAR] {} registration failed: {}",
            registration,
            reason
        );
        self.mark(&registration, RegistrationState::Failed);
        self.notify_registration_failure(registration.clone());
        if !self.is_shut_down() {
            let delay = self.retry_delay();
            let registrar = Arc::clone(self);
            self.executor
                .schedule_after(delay, move || registrar.attempt_registration(registration));
        }
    }

    /// One remote unregistration call, never retried.
    fn attempt_unregistration(self: &Arc<Self>, registration: Registration) {
        let reason = match self.call_unregister(&registration) {
            Ok(response) if response.is_success() => {
                log::info!("[REGISTRAR] {} unregistered", registration);
                self.listeners
                    .signal(move |listener| listener.on_unregistration_success(&registration));
                return;
            }
            Ok(response) => format!("{}: {}", response.code, response.message),
            Err(e) => e.to_string(),
        };
        log::warn!(
            "[REGISTRAR] {} unregistration failed: {}",
            registration,
            reason
        );
        self.notify_unregistration_failure(registration);
    }

    fn call_register(&self, registration: &Registration) -> crate::error::Result<Response<Vec<String>>> {
        match registration {
            Registration::Publisher { topic, topic_type } => self.master.register_publisher(
                &self.caller_id,
                topic,
                topic_type,
                &self.caller_api,
            ),
            Registration::Subscriber { topic, topic_type } => self.master.register_subscriber(
                &self.caller_id,
                topic,
                topic_type,
                &self.caller_api,
            ),
            Registration::Service { name, service_api } => self
                .master
                .register_service(&self.caller_id, name, service_api, &self.caller_api)
                .map(|response| response.map(|()| Vec::new())),
        }
    }

    fn call_unregister(&self, registration: &Registration) -> crate::error::Result<Response<i32>> {
        match registration {
            Registration::Publisher { topic, .. } => {
                self.master
                    .unregister_publisher(&self.caller_id, topic, &self.caller_api)
            }
            Registration::Subscriber { topic, .. } => {
                self.master
                    .unregister_subscriber(&self.caller_id, topic, &self.caller_api)
            }
            Registration::Service { name, service_api } => {
                self.master
                    .unregister_service(&self.caller_id, name, service_api)
            }
        }
    }

    /// Update the state of a still-tracked entry.
    fn mark(&self, registration: &Registration, state: RegistrationState) {
        if let Some(mut entry) = self.entries.get_mut(&registration.key()) {
            *entry.value_mut() = state;
        }
    }

    fn notify_registration_failure(&self, registration: Registration) {
        self.listeners
            .signal(move |listener| listener.on_registration_failure(&registration));
    }

    fn notify_unregistration_failure(&self, registration: Registration) {
        self.listeners
            .signal(move |listener| listener.on_unregistration_failure(&registration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Instant;

    /// Master that fails the first `failures_left` register calls.
    struct ScriptedMaster {
        failures_left: AtomicU32,
        register_calls: AtomicU32,
        unregister_calls: AtomicU32,
        unregister_succeeds: bool,
        peer_apis: Vec<String>,
    }

    impl ScriptedMaster {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicU32::new(failures),
                register_calls: AtomicU32::new(0),
                unregister_calls: AtomicU32::new(0),
                unregister_succeeds: true,
                peer_apis: vec!["http://remote:11311/".to_string()],
            })
        }

        fn failing_unregister() -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicU32::new(0),
                register_calls: AtomicU32::new(0),
                unregister_calls: AtomicU32::new(0),
                unregister_succeeds: false,
                peer_apis: Vec::new(),
            })
        }

        fn answer_register(&self) -> crate::error::Result<Response<Vec<String>>> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            let failures = self.failures_left.load(Ordering::SeqCst);
            if failures > 0 {
                self.failures_left.store(failures - 1, Ordering::SeqCst);
                return Err(Error::IoError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "master unreachable",
                )));
            }
            Ok(Response::success("registered", self.peer_apis.clone()))
        }

        fn answer_unregister(&self) -> crate::error::Result<Response<i32>> {
            self.unregister_calls.fetch_add(1, Ordering::SeqCst);
            if self.unregister_succeeds {
                Ok(Response::success("unregistered", 1))
            } else {
                Ok(Response::failure("caller unknown", 0))
            }
        }
    }

    impl MasterClient for ScriptedMaster {
        fn register_publisher(
            &self,
            _caller_id: &str,
            _topic: &str,
            _topic_type: &str,
            _caller_api: &str,
        ) -> crate::error::Result<Response<Vec<String>>> {
            self.answer_register()
        }

        fn unregister_publisher(
            &self,
            _caller_id: &str,
            _topic: &str,
            _caller_api: &str,
        ) -> crate::error::Result<Response<i32>> {
            self.answer_unregister()
        }

        fn register_subscriber(
            &self,
            _caller_id: &str,
            _topic: &str,
            _topic_type: &str,
            _caller_api: &str,
        ) -> crate::error::Result<Response<Vec<String>>> {
            self.answer_register()
        }

        fn unregister_subscriber(
            &self,
            _caller_id: &str,
            _topic: &str,
            _caller_api: &str,
        ) -> crate::error::Result<Response<i32>> {
            self.answer_unregister()
        }

        fn register_service(
            &self,
            _caller_id: &str,
            _service: &str,
            _service_api: &str,
            _caller_api: &str,
        ) -> crate::error::Result<Response<()>> {
            self.answer_register().map(|response| response.map(|_| ()))
        }

        fn unregister_service(
            &self,
            _caller_id: &str,
            _service: &str,
            _service_api: &str,
        ) -> crate::error::Result<Response<i32>> {
            self.answer_unregister()
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        registered: AtomicU32,
        registration_failures: AtomicU32,
        unregistered: AtomicU32,
        unregistration_failures: AtomicU32,
        last_peers: Mutex<Vec<String>>,
    }

    impl RegistrationListener for RecordingListener {
        fn on_registration_success(&self, _registration: &Registration, peer_apis: &[String]) {
            *self.last_peers.lock() = peer_apis.to_vec();
            self.registered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_registration_failure(&self, _registration: &Registration) {
            self.registration_failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unregistration_success(&self, _registration: &Registration) {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unregistration_failure(&self, _registration: &Registration) {
            self.unregistration_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn registrar_with(
        master: Arc<dyn MasterClient>,
        executor: &TaskExecutor,
    ) -> (Arc<Registrar>, Arc<RecordingListener>) {
        let registrar = Registrar::new(
            "/node",
            "http://localhost:11311/",
            master,
            executor.clone(),
            Duration::from_millis(30),
        );
        let listener = Arc::new(RecordingListener::default());
        registrar.add_listener(listener.clone());
        (registrar, listener)
    }

    fn chatter() -> Registration {
        Registration::Publisher {
            topic: "/chatter".to_string(),
            topic_type: "std_msgs/String".to_string(),
        }
    }

    #[test]
    fn test_publisher_registers_and_notifies() {
        let exec = TaskExecutor::new("reg-basic", 2).unwrap();
        let master = ScriptedMaster::new(0);
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.publisher_added("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registered.load(Ordering::SeqCst) == 1
        }));
        assert!(registrar
            .registration_state(&chatter())
            .is_registered());
        assert_eq!(master.register_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.stats().attempts, 1);
        assert_eq!(registrar.stats().failures, 0);
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_registration_retries_until_master_answers() {
        let exec = TaskExecutor::new("reg-retry", 2).unwrap();
        let master = ScriptedMaster::new(2);
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.publisher_added("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registration_failures.load(Ordering::SeqCst) >= 1
        }));
        assert!(wait_until(Duration::from_secs(3), || {
            listener.registered.load(Ordering::SeqCst) == 1
        }));
        assert!(registrar
            .registration_state(&chatter())
            .is_registered());
        assert_eq!(master.register_calls.load(Ordering::SeqCst), 3);
        assert_eq!(registrar.stats().failures, 2);
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_unregistration_is_not_retried() {
        let exec = TaskExecutor::new("reg-unreg", 2).unwrap();
        let master = ScriptedMaster::failing_unregister();
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.publisher_added("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registered.load(Ordering::SeqCst) == 1
        }));
        registrar.publisher_removed("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.unregistration_failures.load(Ordering::SeqCst) == 1
        }));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(master.unregister_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            registrar.registration_state(&chatter()),
            RegistrationState::Unregistered
        );
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_removal_stops_pending_retries() {
        let exec = TaskExecutor::new("reg-stop", 2).unwrap();
        let master = ScriptedMaster::new(u32::MAX);
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.publisher_added("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registration_failures.load(Ordering::SeqCst) >= 2
        }));
        registrar.publisher_removed("/chatter", "std_msgs/String");

        // Let any in-flight attempt finish, then check the calls stop.
        thread::sleep(Duration::from_millis(100));
        let settled = master.register_calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(master.register_calls.load(Ordering::SeqCst), settled);
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_fails_calls_without_contacting_master() {
        let exec = TaskExecutor::new("reg-shutdown", 2).unwrap();
        let master = ScriptedMaster::new(0);
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.shutdown();
        registrar.shutdown();
        registrar.publisher_added("/chatter", "std_msgs/String");
        registrar.publisher_removed("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registration_failures.load(Ordering::SeqCst) == 1
                && listener.unregistration_failures.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(master.register_calls.load(Ordering::SeqCst), 0);
        assert_eq!(master.unregister_calls.load(Ordering::SeqCst), 0);
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_subscriber_success_carries_publisher_endpoints() {
        let exec = TaskExecutor::new("reg-sub", 2).unwrap();
        let master = ScriptedMaster::new(0);
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.subscriber_added("/chatter", "std_msgs/String");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registered.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(
            *listener.last_peers.lock(),
            vec!["http://remote:11311/".to_string()]
        );
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_service_registration_lifecycle() {
        let exec = TaskExecutor::new("reg-srv", 2).unwrap();
        let master = ScriptedMaster::new(0);
        let (registrar, listener) = registrar_with(master.clone(), &exec);

        registrar.service_added("/add_two_ints", "rosrpc://localhost:33333/");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.registered.load(Ordering::SeqCst) == 1
        }));
        let service = Registration::Service {
            name: "/add_two_ints".to_string(),
            service_api: "rosrpc://localhost:33333/".to_string(),
        };
        assert!(registrar.registration_state(&service).is_registered());

        registrar.service_removed("/add_two_ints", "rosrpc://localhost:33333/");
        assert!(wait_until(Duration::from_secs(2), || {
            listener.unregistered.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(registrar.tracked_count(), 0);
        exec.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(RegistrationState::Unregistered.to_string(), "UNREGISTERED");
        assert_eq!(RegistrationState::Pending.to_string(), "PENDING");
        assert_eq!(RegistrationState::Registered.to_string(), "REGISTERED");
        assert_eq!(RegistrationState::Failed.to_string(), "FAILED");
        assert!(RegistrationState::Pending.is_pending());
        assert!(RegistrationState::Failed.is_failed());
        assert!(!RegistrationState::Unregistered.is_registered());
    }
}

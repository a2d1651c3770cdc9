// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration driving the transport: a flaky master, a registrar that
//! keeps retrying, and a listener that dials every publisher endpoint
//! the master finally hands back.

use hros::concurrent::TaskExecutor;
use hros::message::StringCodec;
use hros::registration::{
    MasterClient, Registrar, Registration, RegistrationListener, RegistrationState, Response,
};
use hros::transport::tcp::{TcpClientManager, TcpServer, TopicDirectory};
use hros::transport::{advertisement, IncomingMessageQueue, OutgoingMessageQueue};
use hros::{Error, MessageDefinition, Result, TransportConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

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

fn string_definition() -> MessageDefinition {
    MessageDefinition::from_text("std_msgs/String", "string data\n")
}

/// Master that refuses the first `failures` calls, then answers every
/// registration with one publisher endpoint.
struct FlakyMaster {
    failures_left: AtomicU32,
    register_calls: AtomicU32,
    publisher_endpoint: String,
}

impl FlakyMaster {
    fn new(failures: u32, publisher_endpoint: SocketAddr) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            register_calls: AtomicU32::new(0),
            publisher_endpoint: publisher_endpoint.to_string(),
        }
    }

    fn answer(&self) -> Result<Response<Vec<String>>> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "master unreachable",
            )));
        }
        Ok(Response::success(
            "registered",
            vec![self.publisher_endpoint.clone()],
        ))
    }
}

impl MasterClient for FlakyMaster {
    fn register_publisher(
        &self,
        _caller_id: &str,
        _topic: &str,
        _topic_type: &str,
        _caller_api: &str,
    ) -> Result<Response<Vec<String>>> {
        self.answer()
    }

    fn unregister_publisher(
        &self,
        _caller_id: &str,
        _topic: &str,
        _caller_api: &str,
    ) -> Result<Response<i32>> {
        Ok(Response::success("unregistered", 1))
    }

    fn register_subscriber(
        &self,
        _caller_id: &str,
        _topic: &str,
        _topic_type: &str,
        _caller_api: &str,
    ) -> Result<Response<Vec<String>>> {
        self.answer()
    }

    fn unregister_subscriber(
        &self,
        _caller_id: &str,
        _topic: &str,
        _caller_api: &str,
    ) -> Result<Response<i32>> {
        Ok(Response::success("unregistered", 1))
    }

    fn register_service(
        &self,
        _caller_id: &str,
        _service: &str,
        _service_api: &str,
        _caller_api: &str,
    ) -> Result<Response<()>> {
        Ok(Response::success("registered", ()))
    }

    fn unregister_service(
        &self,
        _caller_id: &str,
        _service: &str,
        _service_api: &str,
    ) -> Result<Response<i32>> {
        Ok(Response::success("unregistered", 1))
    }
}

/// Dials every publisher endpoint reported for a subscription.
struct DialingListener {
    manager: Arc<TcpClientManager>,
}

impl RegistrationListener for DialingListener {
    fn on_registration_success(&self, registration: &Registration, peer_apis: &[String]) {
        if !matches!(registration, Registration::Subscriber { .. }) {
            return;
        }
        for api in peer_apis {
            match api.parse::<SocketAddr>() {
                Ok(remote) => {
                    if let Err(e) = self.manager.connect(remote) {
                        log::warn!("connect to {} failed: {}", remote, e);
                    }
                }
                Err(e) => log::warn!("unusable publisher endpoint '{}': {}", api, e),
            }
        }
    }
}

#[test]
fn test_subscription_survives_master_outage_and_delivers() {
    let config = TransportConfig::default();
    let executor = TaskExecutor::new("node", 4).unwrap();

    // Live publisher, up before the master deigns to answer.
    let out = Arc::new(OutgoingMessageQueue::new(
        "/chatter",
        Arc::new(StringCodec),
        &config,
    ));
    out.start().unwrap();
    let directory = Arc::new(TopicDirectory::new());
    let sink = Arc::clone(&out);
    directory.advertise(
        "/chatter",
        advertisement("/talker", "/chatter", &string_definition(), false),
        move |channel| sink.add_channel(channel),
    );
    let server = TcpServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        "/talker",
        directory,
        executor.clone(),
        &config,
    )
    .unwrap();
    server.start().unwrap();

    // Subscriber half, driven entirely by registration callbacks.
    let incoming = Arc::new(IncomingMessageQueue::<String>::new(
        "/chatter",
        Arc::new(StringCodec),
        executor.clone(),
        &config,
    ));
    incoming.start().unwrap();
    let manager = Arc::new(TcpClientManager::new(
        "/listener",
        "/chatter",
        string_definition(),
        true,
        incoming.frame_receiver(),
        executor.clone(),
        &config,
    ));

    let master = Arc::new(FlakyMaster::new(2, server.local_addr()));
    let registrar = Registrar::new(
        "/listener",
        "http://127.0.0.1:8080/",
        Arc::clone(&master) as Arc<dyn MasterClient>,
        executor.clone(),
        Duration::from_millis(30),
    );
    registrar.add_listener(Arc::new(DialingListener {
        manager: Arc::clone(&manager),
    }));

    registrar.subscriber_added("/chatter", "std_msgs/String");

    // Two refusals, then success, then the dial and handshake.
    let subscription = Registration::Subscriber {
        topic: "/chatter".to_string(),
        topic_type: "std_msgs/String".to_string(),
    };
    assert!(wait_until(Duration::from_secs(3), || {
        registrar.registration_state(&subscription).is_registered()
    }));
    assert_eq!(master.register_calls.load(Ordering::SeqCst), 3);
    assert!(wait_until(Duration::from_secs(3), || {
        out.channel_count() == 1
    }));

    out.put("Would you like to play a game?".to_string());
    let message = incoming.poll(Duration::from_secs(3)).unwrap();
    assert_eq!(*message, "Would you like to play a game?");

    registrar.shutdown();
    manager.shutdown(Duration::from_secs(2));
    incoming.shutdown(Duration::from_secs(2));
    out.shutdown(Duration::from_secs(2));
    server.shutdown(Duration::from_secs(2));
    executor.shutdown(Duration::from_secs(2));
}

#[test]
fn test_unregistration_after_registration_is_single_shot() {
    let executor = TaskExecutor::new("unreg", 2).unwrap();
    let master = Arc::new(FlakyMaster::new(
        0,
        SocketAddr::from(([127, 0, 0, 1], 1)),
    ));
    let registrar = Registrar::new(
        "/talker",
        "http://127.0.0.1:8080/",
        Arc::clone(&master) as Arc<dyn MasterClient>,
        executor.clone(),
        Duration::from_millis(30),
    );

    registrar.publisher_added("/chatter", "std_msgs/String");
    let publication = Registration::Publisher {
        topic: "/chatter".to_string(),
        topic_type: "std_msgs/String".to_string(),
    };
    assert!(wait_until(Duration::from_secs(3), || {
        registrar.registration_state(&publication).is_registered()
    }));

    registrar.publisher_removed("/chatter", "std_msgs/String");
    assert!(wait_until(Duration::from_secs(3), || {
        registrar.registration_state(&publication) == RegistrationState::Unregistered
    }));
    assert_eq!(registrar.tracked_count(), 0);

    executor.shutdown(Duration::from_secs(2));
}

//! End-to-end scenarios: a real admin server and simulated devices talking
//! PSK-TLS over loopback.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use hex_literal::hex;

use ramb_agent::{Device, DeviceConfig, Fleet, Stats};
use ramb_scp::{ScpVariant, SecurityLevel, StaticKeys};
use ramb_server::{AdminServer, ProvisioningScript, ServerConfig};
use ramb_session::event::events;
use ramb_session::{ChannelSink, Event, NullSink, RetryPolicy};
use ramb_transport::MemoryKeyStore;

struct TestServer {
    addr: std::net::SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    events: Receiver<Event>,
}

impl TestServer {
    fn start(script: ProvisioningScript) -> Self {
        let mut key_store = MemoryKeyStore::new();
        key_store.insert("test_card", vec![0u8; 16]);

        let (sink, events) = ChannelSink::bounded(256);
        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            workers: 4,
            inactivity_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        };
        let server = AdminServer::bind(
            config,
            Arc::new(key_store),
            StaticKeys::from_single_key([0u8; 16]),
            script,
            Arc::new(sink),
        )
        .expect("bind loopback");

        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = std::thread::spawn(move || {
            server.run().expect("server run");
        });

        Self {
            addr,
            shutdown,
            handle,
            events,
        }
    }

    fn stop(self) {
        self.shutdown
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self.handle.join().expect("server thread");
    }

    fn wait_for_event(&self, event_type: &str) -> Event {
        let deadline = Duration::from_secs(10);
        loop {
            let event = self
                .events
                .recv_timeout(deadline)
                .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"));
            if event.event_type == event_type {
                return event;
            }
        }
    }
}

fn device_config(addr: std::net::SocketAddr) -> DeviceConfig {
    let mut config = DeviceConfig::new(addr, "test_card", vec![0u8; 16]);
    config.retry = RetryPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(40),
        max_attempts: 2,
    };
    config.connect_timeout = Duration::from_secs(5);
    config.exchange_timeout = Duration::from_secs(5);
    config
}

#[test]
fn select_isd_compliance_scenario() {
    let server = TestServer::start(ProvisioningScript::select_isd());

    let stats = Arc::new(Stats::new());
    let device = Device::new(
        device_config(server.addr),
        Arc::new(NullSink),
        Arc::clone(&stats),
    );
    let record = device.run().expect("session should complete");

    // Exactly one exchange: SELECT ISD-R answered 9000
    assert_eq!(record.apdu_count(), 1);
    assert_eq!(
        record.exchanges[0].command.as_ref(),
        hex!("00A4040008A000000151000000")
    );
    assert_eq!(record.exchanges[0].status, 0x9000);

    // The server saw the same session shape
    let ended = server.wait_for_event(events::SESSION_ENDED);
    assert_eq!(ended.data["apdu_count"], 1);
    assert_eq!(ended.data["reason"], "completed");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.sessions_completed, 1);
    assert_eq!(snapshot.reconnect_attempts, 0);

    server.stop();
}

#[test]
fn wrong_psk_is_fatal_and_never_retried() {
    let server = TestServer::start(ProvisioningScript::select_isd());

    let mut config = device_config(server.addr);
    config.psk_key = vec![0x11; 16];

    let stats = Arc::new(Stats::new());
    let device = Device::new(config, Arc::new(NullSink), Arc::clone(&stats));
    let result = device.run();
    assert!(result.is_err(), "handshake must fail with the wrong key");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.sessions_failed, 1);
    // Fatal means fatal: zero reconnection attempts
    assert_eq!(snapshot.reconnect_attempts, 0);

    let mismatch = server.wait_for_event(events::PSK_MISMATCH);
    assert_eq!(mismatch.data["identity"], "test_card");

    server.stop();
}

#[test]
fn unknown_identity_is_rejected() {
    let server = TestServer::start(ProvisioningScript::select_isd());

    let mut config = device_config(server.addr);
    config.identity = "stranger".to_string();

    let stats = Arc::new(Stats::new());
    let device = Device::new(config, Arc::new(NullSink), Arc::clone(&stats));
    assert!(device.run().is_err());

    let mismatch = server.wait_for_event(events::PSK_MISMATCH);
    assert_eq!(mismatch.data["identity"], "stranger");

    server.stop();
}

#[test]
fn scp02_authenticated_audit() {
    let server = TestServer::start(ProvisioningScript::authenticated_audit(
        ScpVariant::Scp02,
        SecurityLevel::Mac,
    ));

    let stats = Arc::new(Stats::new());
    let device = Device::new(
        device_config(server.addr),
        Arc::new(NullSink),
        Arc::clone(&stats),
    );
    let record = device.run().expect("audit session should complete");

    // SELECT, INITIALIZE UPDATE, EXTERNAL AUTHENTICATE, GET STATUS x2
    assert_eq!(record.apdu_count(), 5);
    assert!(record.exchanges.iter().all(|e| e.status == 0x9000));
    assert_eq!(record.exchanges[1].ins, 0x50);
    assert_eq!(record.exchanges[2].ins, 0x82);
    assert_eq!(record.exchanges[3].ins, 0xF2);

    server.stop();
}

#[test]
fn scp03_encrypted_audit() {
    let server = TestServer::start(ProvisioningScript::authenticated_audit(
        ScpVariant::Scp03,
        SecurityLevel::MacEnc,
    ));

    let mut config = device_config(server.addr);
    config.card.variant = ScpVariant::Scp03;

    let stats = Arc::new(Stats::new());
    let device = Device::new(config, Arc::new(NullSink), Arc::clone(&stats));
    let record = device.run().expect("SCP03 session should complete");

    assert_eq!(record.apdu_count(), 5);
    assert!(record.exchanges.iter().all(|e| e.status == 0x9000));

    server.stop();
}

#[test]
fn concurrent_devices_share_one_server() {
    let server = TestServer::start(ProvisioningScript::select_isd());

    let devices: Vec<DeviceConfig> = (0..5).map(|_| device_config(server.addr)).collect();
    let snapshot = Fleet::new(devices, Arc::new(NullSink)).run();

    assert_eq!(snapshot.sessions_completed, 5);
    assert_eq!(snapshot.sessions_failed, 0);
    assert_eq!(snapshot.apdus_exchanged, 5);
    assert!(snapshot.mean_handshake.is_some());

    server.stop();
}

//! End-to-end tests of the bonding engine against a mock relay
//!
//! Each test runs a real engine (worker thread, listener and path sockets) on
//! loopback, plays the local SRT application through the listener, and the
//! relay through `MockRelay`.

mod common;

use common::*;
use srtla_bonding::*;
use srtla_protocol::SrtlaType;
use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// PATH SELECTION
// ============================================================================

#[test]
fn test_wifi_only_then_cellular_takes_over() {
    let relay = MockRelay::start(false);
    let mut config = loopback_config(&[Affinity::Cellular, Affinity::Wifi]);
    // Cellular must stay registering until the test confirms it
    config.timing.registration_timeout = Duration::from_secs(60);

    let engine = BondingEngine::new(config, Arc::new(NullDelegate)).unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| {
        s.paths.iter().all(|p| p.status == PathStatus::Registering)
    });
    let cellular_port = path_port(&stats, Affinity::Cellular);
    let wifi_port = path_port(&stats, Affinity::Wifi);

    relay.confirm(wifi_port);
    let stats = wait_for_stats(&engine, |s| {
        path_status(s, Affinity::Wifi) == Some(PathStatus::Connected)
    });
    assert_eq!(
        path_status(&stats, Affinity::Cellular),
        Some(PathStatus::Registering)
    );

    let app = LocalApp::connect(stats.listener_port.unwrap());
    for seq in 1..=10 {
        app.send(&data_packet(seq, 188));
    }
    let received = relay.wait_for_received(10);
    assert!(received.iter().all(|(port, _)| *port == wifi_port));

    relay.confirm(cellular_port);
    let stats = wait_for_stats(&engine, |s| {
        path_status(s, Affinity::Cellular) == Some(PathStatus::Connected)
    });
    let cellular = stats.path(Affinity::Cellular).unwrap();
    let wifi = stats.path(Affinity::Wifi).unwrap();
    assert!(cellular.score > wifi.score);

    app.send(&data_packet(11, 188));
    let received = relay.wait_for_received(11);
    assert_eq!(received[10].0, cellular_port);
    assert_eq!(received[10].1, data_packet(11, 188));
}

#[test]
fn test_datagrams_forwarded_verbatim() {
    let relay = MockRelay::start(true);
    let engine =
        BondingEngine::new(loopback_config(&[Affinity::Wifi]), Arc::new(NullDelegate)).unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 1);
    let app = LocalApp::connect(stats.listener_port.unwrap());

    // Control packets of unknown type are forwarded too
    let mut unknown_control = vec![0u8; 16];
    unknown_control[..2].copy_from_slice(&0x8123u16.to_be_bytes());

    let packets = vec![data_packet(0x7FFF_FFFF, 1316), unknown_control];
    for packet in &packets {
        app.send(packet);
    }

    let received = relay.wait_for_received(2);
    let payloads: Vec<Vec<u8>> = received.into_iter().map(|(_, data)| data).collect();
    assert_eq!(payloads, packets);
}

// ============================================================================
// INBOUND
// ============================================================================

#[test]
fn test_inbound_datagram_reaches_local_peer() {
    let delegate = Arc::new(CountingDelegate::default());
    let relay = MockRelay::start(true);
    let engine = BondingEngine::new(loopback_config(&[Affinity::Wifi]), delegate.clone()).unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 1);
    let wifi_port = path_port(&stats, Affinity::Wifi);

    // The listener answers whichever peer spoke last
    let app = LocalApp::connect(stats.listener_port.unwrap());
    app.send(&data_packet(1, 64));
    relay.wait_for_received(1);

    let inbound = data_packet(7, 200);
    assert_eq!(&inbound[..4], &[0x00, 0x00, 0x00, 0x07]);
    relay.send_to_path(wifi_port, &inbound);

    assert_eq!(app.recv(), inbound);
    let stats = wait_for_stats(&engine, |s| s.packets_received == 1);
    assert_eq!(stats.bytes_received, inbound.len() as u64);
    assert_eq!(delegate.received.load(Ordering::SeqCst), 1);
}

#[test]
fn test_registration_messages_never_reach_listener() {
    let relay = MockRelay::start(true);
    let engine =
        BondingEngine::new(loopback_config(&[Affinity::Wifi]), Arc::new(NullDelegate)).unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 1);
    let wifi_port = path_port(&stats, Affinity::Wifi);
    let app = LocalApp::connect(stats.listener_port.unwrap());
    app.send(&data_packet(1, 64));
    relay.wait_for_received(1);

    relay.confirm(wifi_port);
    let inbound = data_packet(2, 64);
    relay.send_to_path(wifi_port, &inbound);

    assert_eq!(app.recv(), inbound);
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn test_rejected_path_leaves_sibling_running() {
    let delegate = Arc::new(CountingDelegate::default());
    let relay = MockRelay::start(true);
    let engine = BondingEngine::new(
        loopback_config(&[Affinity::Cellular, Affinity::Wifi]),
        delegate.clone(),
    )
    .unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 2);
    let cellular_port = path_port(&stats, Affinity::Cellular);
    let wifi_port = path_port(&stats, Affinity::Wifi);

    relay.reject(cellular_port, SrtlaType::RegErr);
    let stats = wait_for_stats(&engine, |s| {
        path_status(s, Affinity::Cellular) == Some(PathStatus::Error)
    });
    assert_eq!(
        path_status(&stats, Affinity::Wifi),
        Some(PathStatus::Connected)
    );
    assert!(delegate
        .transitions
        .lock()
        .contains(&(Affinity::Cellular, PathStatus::Error)));

    let app = LocalApp::connect(stats.listener_port.unwrap());
    for seq in 0..3 {
        app.send(&data_packet(seq, 100));
    }
    let received = relay.wait_for_received(3);
    assert!(received.iter().all(|(port, _)| *port == wifi_port));
}

#[test]
fn test_failed_path_reconnects_after_delay() {
    let relay = MockRelay::start(true);
    let mut config = loopback_config(&[Affinity::Wifi]);
    config.timing.reconnect_delay = Duration::from_millis(200);

    let engine = BondingEngine::new(config, Arc::new(NullDelegate)).unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 1);
    relay.reject(path_port(&stats, Affinity::Wifi), SrtlaType::RegNgp);
    wait_for_stats(&engine, |s| s.connected_paths() == 0);

    let stats = wait_for_stats(&engine, |s| {
        s.connected_paths() == 1 && s.paths[0].reconnects == 1
    });
    assert_eq!(relay.reg1_count(), 2);
    assert_eq!(stats.paths[0].in_flight, 0);
}

#[test]
fn test_keepalive_timeout_demotes_path() {
    let relay = MockRelay::start(true);
    let mut config = loopback_config(&[Affinity::Wifi]);
    config.timing.keepalive_interval = Duration::from_millis(50);
    config.timing.connection_timeout = Duration::from_millis(300);

    let engine = BondingEngine::new(config, Arc::new(NullDelegate)).unwrap();
    engine.start(&relay.uri()).unwrap();

    // The relay echoes keepalives, so the path stays up and measures RTT
    wait_for_stats(&engine, |s| {
        s.connected_paths() == 1 && s.paths[0].rtt_us.is_some()
    });

    drop(relay);
    wait_for_stats(&engine, |s| s.paths[0].status == PathStatus::Error);
}

#[test]
fn test_no_path_drops_each_datagram_once() {
    let delegate = Arc::new(CountingDelegate::default());
    let relay = MockRelay::start(false);
    let mut config = loopback_config(&[Affinity::Cellular, Affinity::Wifi]);
    config.timing.registration_timeout = Duration::from_secs(60);

    let engine = BondingEngine::new(config, delegate.clone()).unwrap();
    engine.start(&relay.uri()).unwrap();
    let stats = wait_for_stats(&engine, |s| {
        s.paths.iter().all(|p| p.status == PathStatus::Registering)
    });

    let app = LocalApp::connect(stats.listener_port.unwrap());
    for seq in 0..5 {
        app.send(&data_packet(seq, 100));
    }

    wait_for_stats(&engine, |s| s.dropped_no_path == 5);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(engine.stats().dropped_no_path, 5);
    assert_eq!(delegate.no_path.load(Ordering::SeqCst), 5);
    assert_eq!(delegate.sent.load(Ordering::SeqCst), 0);
    assert!(relay.received().is_empty());
}

#[test]
fn test_short_datagram_dropped_as_malformed() {
    let relay = MockRelay::start(true);
    let engine =
        BondingEngine::new(loopback_config(&[Affinity::Wifi]), Arc::new(NullDelegate)).unwrap();
    engine.start(&relay.uri()).unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 1);
    let app = LocalApp::connect(stats.listener_port.unwrap());
    app.send(&[0u8; 15]);

    let stats = wait_for_stats(&engine, |s| s.dropped_malformed == 1);
    assert_eq!(stats.dropped_no_path, 0);
    assert_eq!(stats.packets_sent, 0);
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_stop_twice_then_restart() {
    let delegate = Arc::new(CountingDelegate::default());
    let relay = MockRelay::start(true);
    let engine = BondingEngine::new(
        loopback_config(&[Affinity::Cellular, Affinity::Wifi]),
        delegate.clone(),
    )
    .unwrap();

    engine.start(&relay.uri()).unwrap();
    wait_for_stats(&engine, |s| s.connected_paths() == 2);

    engine.stop();
    engine.stop();
    let stats = wait_for_stats(&engine, |s| !s.running);
    assert!(stats.listener_port.is_none());
    assert!(stats
        .paths
        .iter()
        .all(|p| p.status == PathStatus::Closed && p.local_addr.is_none()));

    engine.start(&relay.uri()).unwrap();
    wait_for_stats(&engine, |s| s.connected_paths() == 2);
    assert_eq!(delegate.ready.load(Ordering::SeqCst), 2);
}

#[test]
fn test_invalid_uri_does_not_start() {
    let delegate = Arc::new(CountingDelegate::default());
    let engine = BondingEngine::new(BondingConfig::default(), delegate.clone()).unwrap();

    for uri in ["relay.example.com:5000", "srtla://:5000", "srtla://relay", "srtla://relay:0"] {
        assert!(matches!(engine.start(uri), Err(EngineError::Uri(_))), "{}", uri);
    }

    thread::sleep(Duration::from_millis(20));
    assert!(!engine.stats().running);
    assert_eq!(delegate.ready.load(Ordering::SeqCst), 0);
}

// ============================================================================
// PASS-THROUGH
// ============================================================================

#[test]
fn test_pass_through_forwards_without_registration() {
    let endpoint = UdpSocket::bind("127.0.0.1:0").unwrap();
    endpoint
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut config = BondingConfig::pass_through();
    config.paths = vec![PathBinding::new(Affinity::Any).with_bind("127.0.0.1:0".parse().unwrap())];
    let engine = BondingEngine::new(config, Arc::new(NullDelegate)).unwrap();
    engine
        .start(&format!("srt://{}", endpoint.local_addr().unwrap()))
        .unwrap();

    let stats = wait_for_stats(&engine, |s| s.connected_paths() == 1);
    assert_eq!(stats.paths.len(), 1);
    assert_eq!(stats.paths[0].affinity, Affinity::Any);

    let app = LocalApp::connect(stats.listener_port.unwrap());
    let packet = data_packet(99, 500);
    app.send(&packet);

    // First thing on the wire is the stream itself, not a reg1
    let mut buf = [0u8; 2048];
    let (n, from) = endpoint.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], &packet[..]);

    let reply = data_packet(5, 80);
    endpoint.send_to(&reply, from).unwrap();
    assert_eq!(app.recv(), reply);
}

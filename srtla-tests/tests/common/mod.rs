//! Shared helpers for engine integration tests
//!
//! `MockRelay` plays the bonding relay on loopback: it answers `reg1` with a
//! `reg2`, echoes keepalives, and confirms registrations with `reg3` either
//! automatically or when the test says so.

#![allow(dead_code)]

use parking_lot::Mutex;
use srtla_bonding::{
    Affinity, BondingConfig, BondingDelegate, BondingEngine, EngineStats, PathBinding, PathStats,
    PathStatus,
};
use srtla_protocol::{RegistrationId, SrtlaMessage, SrtlaType, GROUP_ID_LEN};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long helpers wait for the engine before failing the test
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RelayState {
    auto_confirm: bool,
    /// Full registration id per path port, once `reg2` was answered
    ids: HashMap<u16, RegistrationId>,
    /// Stream datagrams per source port, in arrival order
    received: Vec<(u16, Vec<u8>)>,
    reg1_count: usize,
}

/// Loopback stand-in for the bonding relay
pub struct MockRelay {
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<RelayState>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MockRelay {
    /// Start the relay; with `auto_confirm` every echoed `reg2` gets a `reg3`
    pub fn start(auto_confirm: bool) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let state = Arc::new(Mutex::new(RelayState {
            auto_confirm,
            ..RelayState::default()
        }));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let socket = Arc::clone(&socket);
            let state = Arc::clone(&state);
            let running = Arc::clone(&running);
            thread::spawn(move || relay_loop(&socket, &state, &running))
        };

        MockRelay {
            socket,
            state,
            running,
            worker: Some(worker),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub fn uri(&self) -> String {
        format!("srtla://{}", self.addr())
    }

    fn path_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Confirm the registration of the path on `port`
    pub fn confirm(&self, port: u16) {
        self.send_to_path(port, &SrtlaMessage::Reg3.to_bytes());
    }

    /// Reject the path on `port`
    pub fn reject(&self, port: u16, rejection: SrtlaType) {
        let msg = match rejection {
            SrtlaType::RegNgp => SrtlaMessage::RegNgp,
            SrtlaType::RegNak => SrtlaMessage::RegNak,
            _ => SrtlaMessage::RegErr,
        };
        self.send_to_path(port, &msg.to_bytes());
    }

    pub fn send_to_path(&self, port: u16, data: &[u8]) {
        self.socket.send_to(data, Self::path_addr(port)).unwrap();
    }

    /// Stream datagrams received so far, with their source port
    pub fn received(&self) -> Vec<(u16, Vec<u8>)> {
        self.state.lock().received.clone()
    }

    pub fn reg1_count(&self) -> usize {
        self.state.lock().reg1_count
    }

    /// Wait until at least `count` stream datagrams arrived
    pub fn wait_for_received(&self, count: usize) -> Vec<(u16, Vec<u8>)> {
        let deadline = Instant::now() + WAIT;
        loop {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            assert!(
                Instant::now() < deadline,
                "relay got {} of {} datagrams",
                received.len(),
                count
            );
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn relay_loop(socket: &UdpSocket, state: &Mutex<RelayState>, running: &AtomicBool) {
    let mut buf = [0u8; 2048];

    while running.load(Ordering::SeqCst) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let data = &buf[..n];

        if SrtlaType::peek(data).is_none() {
            state.lock().received.push((from.port(), data.to_vec()));
            continue;
        }

        match SrtlaMessage::from_bytes(data) {
            Ok(SrtlaMessage::Reg1(id)) => {
                let mut full = *id.as_bytes();
                full[GROUP_ID_LEN..].fill(from.port() as u8);
                let full = RegistrationId::from_bytes(full);
                {
                    let mut state = state.lock();
                    state.reg1_count += 1;
                    state.ids.insert(from.port(), full.clone());
                }
                let _ = socket.send_to(&SrtlaMessage::Reg2(full).to_bytes(), from);
            }
            Ok(SrtlaMessage::Reg2(id)) => {
                let confirm = {
                    let state = state.lock();
                    state.auto_confirm && state.ids.get(&from.port()) == Some(&id)
                };
                if confirm {
                    let _ = socket.send_to(&SrtlaMessage::Reg3.to_bytes(), from);
                }
            }
            Ok(SrtlaMessage::KeepAlive { .. }) => {
                let _ = socket.send_to(data, from);
            }
            _ => {}
        }
    }
}

/// Delegate that counts every callback
#[derive(Default)]
pub struct CountingDelegate {
    pub ready: AtomicUsize,
    pub listener_errors: AtomicUsize,
    pub sent: AtomicUsize,
    pub received: AtomicUsize,
    pub no_path: AtomicUsize,
    pub transitions: Mutex<Vec<(Affinity, PathStatus)>>,
}

impl BondingDelegate for CountingDelegate {
    fn listener_ready(&self, _port: u16) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn listener_error(&self) {
        self.listener_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn packet_sent(&self, _byte_count: usize) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn packet_received(&self, _byte_count: usize) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn no_path_available(&self) {
        self.no_path.fetch_add(1, Ordering::SeqCst);
    }

    fn path_state_changed(&self, affinity: Affinity, status: PathStatus) {
        self.transitions.lock().push((affinity, status));
    }
}

/// Bonded config whose paths bind loopback, so the relay sees their ports
pub fn loopback_config(affinities: &[Affinity]) -> BondingConfig {
    let paths = affinities
        .iter()
        .map(|a| PathBinding::new(*a).with_bind("127.0.0.1:0".parse().unwrap()))
        .collect();
    BondingConfig::with_paths(paths)
}

/// Poll the engine's statistics until `done` holds
pub fn wait_for_stats(engine: &BondingEngine, done: impl Fn(&EngineStats) -> bool) -> EngineStats {
    let deadline = Instant::now() + WAIT;
    loop {
        let stats = engine.stats();
        if done(&stats) {
            return stats;
        }
        assert!(Instant::now() < deadline, "engine never reached state: {:#?}", stats);
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn path_status(stats: &EngineStats, affinity: Affinity) -> Option<PathStatus> {
    stats.path(affinity).map(|p| p.status)
}

/// Port of a path's socket; the path must be open
pub fn path_port(stats: &EngineStats, affinity: Affinity) -> u16 {
    stats
        .path(affinity)
        .and_then(|p: &PathStats| p.local_addr)
        .map(|a| a.port())
        .unwrap()
}

/// SRT data packet with sequence number `seq` and a recognisable payload
pub fn data_packet(seq: u32, len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; len.max(16)];
    packet[..4].copy_from_slice(&(seq & 0x7FFF_FFFF).to_be_bytes());
    for (i, byte) in packet[16..].iter_mut().enumerate() {
        *byte = (seq as usize + i) as u8;
    }
    packet
}

/// The local SRT application: a socket aimed at the engine's listener
pub struct LocalApp {
    pub socket: UdpSocket,
    target: SocketAddr,
}

impl LocalApp {
    pub fn connect(listener_port: u16) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        LocalApp {
            socket,
            target: SocketAddr::from(([127, 0, 0, 1], listener_port)),
        }
    }

    pub fn send(&self, data: &[u8]) {
        self.socket.send_to(data, self.target).unwrap();
    }

    pub fn recv(&self) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        let (n, _) = self.socket.recv_from(&mut buf).unwrap();
        buf[..n].to_vec()
    }
}

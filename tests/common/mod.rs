//! Shared fixtures: storage directories, dispatchers and synthetic
//! handshakes whose password is known.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pmkforge::backend::{Backend, BackendKind, CpuBackend};
use pmkforge::capture::{PcapWriter, Timestamp};
use pmkforge::crypto;
use pmkforge::error::BackendError;
use pmkforge::handshake::{Handshake, Pairing};
use pmkforge::{DispatchConfig, Dispatcher, Essid, MacAddr, Password, Pmk, StorageEngine};
use tempfile::TempDir;

pub const AP: MacAddr = MacAddr([0x00, 0x0b, 0x86, 0xc2, 0xa4, 0x85]);
pub const STATION: MacAddr = MacAddr([0x00, 0x13, 0xce, 0x55, 0x98, 0xef]);
pub const ANONCE: [u8; 32] = [0x3e; 32];
pub const SNONCE: [u8; 32] = [0x61; 32];

const LLC_EAPOL: [u8; 8] = [0xaa, 0xaa, 0x03, 0, 0, 0, 0x88, 0x8e];

pub fn storage() -> (TempDir, StorageEngine) {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageEngine::open(dir.path().join("db")).unwrap();
    (dir, storage)
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        min_batch: 32,
        max_batch: 256,
        benchmark_ms: 1,
        ..DispatchConfig::default()
    }
}

pub fn cpu_dispatcher() -> Dispatcher {
    let cpu: Arc<dyn Backend> = Arc::new(CpuBackend::new(4).unwrap());
    Dispatcher::with_capabilities(vec![(cpu, 500.0)], dispatch_config()).unwrap()
}

/// `test123<i>` for i in 0..n, then the extra candidates.
pub fn passwords(n: usize, extra: &[&str]) -> Vec<Password> {
    (0..n)
        .map(|i| Password::new(format!("test123{}", i).into_bytes()).unwrap())
        .chain(extra.iter().map(|s| s.parse().unwrap()))
        .collect()
}

pub fn wordlist(passwords: &[Password]) -> Vec<u8> {
    let mut out = Vec::new();
    for pw in passwords {
        out.extend_from_slice(pw.as_bytes());
        out.push(b'\n');
    }
    out
}

pub fn essid(s: &str) -> Essid {
    s.parse().unwrap()
}

/// Message 2 of a four-way handshake with a zeroed MIC.
fn message2(replay: u64) -> Vec<u8> {
    let key_info: u16 = 2 | 0x0008 | 0x0100;
    let mut key_data = vec![0x30, 0x14, 0x01, 0x00];
    key_data.resize(22, 0);

    let body_len = 95 + key_data.len();
    let mut frame = vec![0u8; 4 + body_len];
    frame[0] = 1;
    frame[1] = 3;
    frame[2..4].copy_from_slice(&(body_len as u16).to_be_bytes());
    frame[4] = 2;
    frame[5..7].copy_from_slice(&key_info.to_be_bytes());
    frame[7..9].copy_from_slice(&16u16.to_be_bytes());
    frame[9..17].copy_from_slice(&replay.to_be_bytes());
    frame[17..49].copy_from_slice(&SNONCE);
    frame[97..99].copy_from_slice(&(key_data.len() as u16).to_be_bytes());
    frame[99..].copy_from_slice(&key_data);
    frame
}

fn message1(replay: u64) -> Vec<u8> {
    let key_info: u16 = 2 | 0x0008 | 0x0080;
    let mut frame = vec![0u8; 99];
    frame[0] = 1;
    frame[1] = 3;
    frame[2..4].copy_from_slice(&95u16.to_be_bytes());
    frame[4] = 2;
    frame[5..7].copy_from_slice(&key_info.to_be_bytes());
    frame[7..9].copy_from_slice(&16u16.to_be_bytes());
    frame[9..17].copy_from_slice(&replay.to_be_bytes());
    frame[17..49].copy_from_slice(&ANONCE);
    frame
}

/// A challenge (M1 + M2) handshake for `password` on `essid`.
pub fn handshake(essid: &str, password: &str) -> Handshake {
    let mut hs = Handshake {
        essid: essid.parse().unwrap(),
        ap_mac: AP,
        station_mac: STATION,
        anonce: ANONCE,
        snonce: SNONCE,
        mic: [0; 16],
        eapol_frame: message2(1),
        key_version: 2,
        replay_counter: 1,
        pairing: Pairing::Challenge,
    };
    let pmk = crypto::derive_pmk(password.as_bytes(), essid.as_bytes());
    hs.mic = crypto::derive_mic(&pmk, &hs);
    hs
}

fn data_frame(from_ap: bool, eapol: &[u8]) -> Vec<u8> {
    let mut f = vec![0x08, if from_ap { 0x02 } else { 0x01 }, 0, 0];
    if from_ap {
        f.extend_from_slice(&STATION.0);
        f.extend_from_slice(&AP.0);
    } else {
        f.extend_from_slice(&AP.0);
        f.extend_from_slice(&STATION.0);
    }
    f.extend_from_slice(&AP.0);
    f.extend_from_slice(&[0, 0]);
    f.extend_from_slice(&LLC_EAPOL);
    f.extend_from_slice(eapol);
    f
}

fn beacon(essid: &[u8]) -> Vec<u8> {
    let mut f = vec![0x80, 0, 0, 0];
    f.extend_from_slice(&MacAddr::BROADCAST.0);
    f.extend_from_slice(&AP.0);
    f.extend_from_slice(&AP.0);
    f.extend_from_slice(&[0, 0]);
    f.extend_from_slice(&[0u8; 12]);
    f.push(0);
    f.push(essid.len() as u8);
    f.extend_from_slice(essid);
    f
}

/// The 802.11 frames of a capture holding `handshake(essid, password)`;
/// the beacon is left out when `named` is false.
pub fn capture_frames(essid: &str, password: &str, named: bool) -> Vec<Vec<u8>> {
    let hs = handshake(essid, password);
    let mut m2 = hs.eapol_frame.clone();
    m2[81..97].copy_from_slice(&hs.mic);

    let mut frames = Vec::new();
    if named {
        frames.push(beacon(essid.as_bytes()));
    }
    frames.push(data_frame(true, &message1(1)));
    frames.push(data_frame(false, &m2));
    frames
}

pub fn pcap(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut w = PcapWriter::new(Vec::new()).unwrap();
    for (i, f) in frames.iter().enumerate() {
        w.write(Timestamp { sec: 1_700_000_000, usec: i as u32 }, f).unwrap();
    }
    w.into_inner()
}

/// Computes correct PMKs except that every batch holding `poison` fails.
pub struct PoisonedBackend {
    pub name: String,
    pub poison: Password,
    pub failures: AtomicUsize,
}

impl PoisonedBackend {
    pub fn new(name: &str, poison: &str) -> Self {
        Self {
            name: name.to_string(),
            poison: poison.parse().unwrap(),
            failures: AtomicUsize::new(0),
        }
    }
}

impl Backend for PoisonedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
        if passwords.contains(&self.poison) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(BackendError::Remote("worker lost".into()));
        }
        Ok(passwords
            .iter()
            .map(|pw| crypto::derive_pmk(pw.as_bytes(), essid.as_bytes()))
            .collect())
    }

    fn preferred_batch(&self) -> usize {
        16
    }

    fn benchmark(&self, _duration: Duration) -> Result<f64, BackendError> {
        Ok(100.0)
    }
}
